//! Caller-driven cancellation for gateway calls.
//!
//! The core imposes no timeouts of its own. A gateway that never answers
//! can only be abandoned by firing the [`CancelSignal`] the caller passed
//! in; [`CancelSignal::run`] races the gateway future against it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::GatewayError;

/// A cloneable cancellation flag that can also be awaited.
///
/// All clones observe the same state. Once cancelled, a signal stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender is owned by `self`, so this only happens during teardown.
            std::future::pending::<()>().await;
        }
    }

    /// Runs `fut` unless the signal fires first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Cancelled`] if the signal was already fired
    /// or fires before `fut` completes, otherwise whatever `fut` returns.
    #[allow(clippy::future_not_send)]
    pub async fn run<F, T>(&self, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        if self.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        tokio::select! {
            biased;
            () = self.cancelled() => Err(GatewayError::Cancelled),
            result = fut => result,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn passes_through_when_not_cancelled() {
        let signal = CancelSignal::new();
        let result = signal.run(async { Ok::<_, GatewayError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn already_cancelled_short_circuits() {
        let signal = CancelSignal::new();
        signal.cancel();
        let result = signal
            .run(async { Ok::<_, GatewayError>("unreachable") })
            .await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn abandons_a_future_that_never_returns() {
        let signal = CancelSignal::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = signal
            .run(std::future::pending::<Result<(), GatewayError>>())
            .await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
        assert!(signal.is_cancelled());
    }
}

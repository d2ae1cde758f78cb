//! HTTP retry helpers for transient gateway errors.
//!
//! Network gateways should call [`send_json`] instead of
//! `reqwest::RequestBuilder::send()` directly so that connection failures,
//! timeouts, HTTP 429 and HTTP 5xx are retried with exponential backoff.
//!
//! ```ignore
//! let body = retry::send_json(|| client.post(&url).form(&params), &policy).await?;
//! ```

use std::time::Duration;

use crate::GatewayError;

/// Maximum length of the response body excerpt kept in errors and logs.
const BODY_PREVIEW_LEN: usize = 300;

/// How many times and how patiently to retry a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(2),
        }
    }

    /// Backoff before retry number `attempt` (1-based): 2s, 4s, 8s, ...
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// `build_request` is called once per attempt, since builders are
/// consumed by `.send()`.
///
/// Does **not** retry HTTP 4xx (except 429): these are permanent, e.g. an
/// Overpass query syntax error.
///
/// # Errors
///
/// Returns [`GatewayError`] if the request still fails after all retries,
/// the server returns a non-retryable status, or the body is not JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(
    build_request: F,
    policy: &RetryPolicy,
) -> Result<serde_json::Value, GatewayError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, policy).await?;
    let url = response.url().to_string();
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| {
        log::warn!(
            "JSON parse failed\n  url: {url}\n  received: {} bytes\n  parse error: {e}\n  body preview: {}",
            text.len(),
            preview(&text),
        );
        GatewayError::Json(e)
    })
}

/// Core retry loop. Returns the first response with a 2xx/3xx status.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GatewayError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_retries = policy.max_retries;
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(GatewayError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    if attempt < max_retries {
                        log::warn!("  HTTP 429 (rate limited)");
                        attempt += 1;
                        continue;
                    }
                    return Err(GatewayError::RateLimited);
                }

                if status.is_server_error() {
                    if attempt < max_retries {
                        log::warn!("  HTTP {status} (server error)");
                        attempt += 1;
                        continue;
                    }
                    return Err(status_error(response).await);
                }

                if status.is_client_error() {
                    return Err(status_error(response).await);
                }

                return Ok(response);
            }
        }
    }
}

#[allow(clippy::future_not_send)]
async fn status_error(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        preview(&body)
    };
    GatewayError::Status {
        status: status.as_u16(),
        message,
    }
}

fn preview(text: &str) -> String {
    if text.len() > BODY_PREVIEW_LEN {
        let cut = text
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= BODY_PREVIEW_LEN)
            .last()
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text.to_string()
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let short = preview(&long);
        assert!(short.ends_with("..."));
        assert!(short.len() <= BODY_PREVIEW_LEN + 5);

        assert_eq!(preview("short body"), "short body");
    }
}

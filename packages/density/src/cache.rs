//! Per-session store of density estimates keyed by area signature.
//!
//! The cache is an explicit object handed to the estimator at
//! construction, so every session (and every test) owns its own. Entries
//! are never invalidated. Two tasks racing on the first estimate for the
//! same area may both probe; the first insert wins and the second result
//! is discarded.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use building_queue_area_models::AreaSignature;
use building_queue_density_models::DensityEstimate;

/// Append-only density estimate cache.
#[derive(Debug, Default)]
pub struct DensityCache {
    entries: RwLock<BTreeMap<AreaSignature, DensityEstimate>>,
}

impl DensityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, signature: &AreaSignature) -> Option<DensityEstimate> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signature)
            .copied()
    }

    /// Stores `estimate` unless an entry already exists, and returns the
    /// entry that ends up cached.
    pub fn insert(&self, signature: AreaSignature, estimate: DensityEstimate) -> DensityEstimate {
        *self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(signature)
            .or_insert(estimate)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use building_queue_area_models::{AreaSelection, Coordinate};

    use super::*;

    #[test]
    fn first_insert_wins() {
        let cache = DensityCache::new();
        let signature = AreaSelection::radius(Coordinate::new(1.0, 1.0), 100.0)
            .unwrap()
            .signature();

        let first = DensityEstimate::from_density(20.0, 1.0);
        let second = DensityEstimate::from_density(900.0, 1.0);

        assert_eq!(cache.insert(signature, first), first);
        assert_eq!(cache.insert(signature, second), first);
        assert_eq!(cache.get(&signature), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn starts_empty() {
        let cache = DensityCache::new();
        assert!(cache.is_empty());
        let signature = AreaSelection::radius(Coordinate::new(0.0, 0.0), 1.0)
            .unwrap()
            .signature();
        assert!(cache.get(&signature).is_none());
    }
}

//! Candidate generation.
//!
//! Turns a user id into the set of items eligible for ranking:
//! - warm users: every catalog item the user has not interacted with
//! - cold-start users: a catalog sample that bypasses scoring entirely

use gamerec_catalog::{InteractionCatalog, ItemCatalog};
use gamerec_model::{ItemId, RecommendError, Result, UserId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How cold-start users are served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdStartPolicy {
    /// The first items of the catalog, in table order
    #[default]
    Head,
    /// A uniform sample of the catalog
    Shuffle,
}

/// Result of candidate selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Items to score, never empty.
    Warm(Vec<ItemId>),
    /// Final items for a user without usable history; not to be scored.
    ColdStart(Vec<ItemId>),
}

impl Candidates {
    pub fn items(&self) -> &[ItemId] {
        match self {
            Self::Warm(items) | Self::ColdStart(items) => items,
        }
    }

    pub fn is_cold_start(&self) -> bool {
        matches!(self, Self::ColdStart(_))
    }
}

/// Selects candidates from injected catalogs.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    interactions: Arc<InteractionCatalog>,
    catalog: Arc<ItemCatalog>,
    policy: ColdStartPolicy,
}

impl CandidateSelector {
    pub fn new(interactions: Arc<InteractionCatalog>, catalog: Arc<ItemCatalog>, policy: ColdStartPolicy) -> Self {
        Self {
            interactions,
            catalog,
            policy,
        }
    }

    pub fn policy(&self) -> ColdStartPolicy {
        self.policy
    }

    /// Choose the candidate set for `user_id`.
    ///
    /// `sample_size` is the number of items a cold-start sample must hold.
    pub fn candidates<R: Rng + ?Sized>(&self, user_id: UserId, sample_size: usize, rng: &mut R) -> Result<Candidates> {
        let history = self.interactions.interactions_for(user_id);
        if history.is_empty() {
            tracing::debug!(user_id, "No interaction history, using cold start");
            return self.cold_start(sample_size, rng).map(Candidates::ColdStart);
        }

        let warm = self.warm_candidates(user_id);
        if warm.is_empty() {
            tracing::warn!(
                user_id,
                interactions = history.len(),
                "User has interacted with the whole catalog, using cold start"
            );
            return self.cold_start(sample_size, rng).map(Candidates::ColdStart);
        }

        tracing::debug!(user_id, candidates = warm.len(), excluded = history.len(), "Selected warm candidates");
        Ok(Candidates::Warm(warm))
    }

    /// Catalog items minus the user's history, in catalog order.
    pub fn warm_candidates(&self, user_id: UserId) -> Vec<ItemId> {
        let history = self.interactions.interactions_for(user_id);
        self.catalog
            .item_ids()
            .iter()
            .copied()
            .filter(|id| !history.contains(id))
            .collect()
    }

    /// Draw `sample_size` catalog items according to the policy.
    pub fn cold_start<R: Rng + ?Sized>(&self, sample_size: usize, rng: &mut R) -> Result<Vec<ItemId>> {
        let universe = self.catalog.item_ids();
        if sample_size > universe.len() {
            return Err(RecommendError::InsufficientCandidates {
                requested: sample_size,
                available: universe.len(),
            });
        }

        let sample = match self.policy {
            ColdStartPolicy::Head => universe[..sample_size].to_vec(),
            ColdStartPolicy::Shuffle => rand::seq::index::sample(rng, universe.len(), sample_size)
                .into_iter()
                .map(|i| universe[i])
                .collect(),
        };
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamerec_model::{CatalogEntry, InteractionRecord, Price};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn catalog(ids: impl IntoIterator<Item = ItemId>) -> Arc<ItemCatalog> {
        let entries = ids.into_iter().map(|id| {
            CatalogEntry::new(id, format!("Game {id}"), format!("https://cdn.example/{id}.jpg"), Price::Free)
        });
        Arc::new(ItemCatalog::from_entries(entries).unwrap())
    }

    fn selector(policy: ColdStartPolicy) -> CandidateSelector {
        let interactions = InteractionCatalog::from_records(vec![
            InteractionRecord::new(42, 10),
            InteractionRecord::new(42, 11),
            InteractionRecord::new(42, 11),
            InteractionRecord::new(7, 10),
            InteractionRecord::new(7, 11),
            InteractionRecord::new(7, 12),
        ]);
        CandidateSelector::new(Arc::new(interactions), catalog(10..=20), policy)
    }

    #[test]
    fn test_warm_excludes_history() {
        let selector = selector(ColdStartPolicy::Head);
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = selector.candidates(42, 3, &mut rng).unwrap();

        assert_eq!(candidates, Candidates::Warm((12..=20).collect()));
        let history: HashSet<_> = [10, 11].into_iter().collect();
        assert!(candidates.items().iter().all(|id| !history.contains(id)));
    }

    #[test]
    fn test_unknown_user_is_cold_start() {
        let selector = selector(ColdStartPolicy::Head);
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = selector.candidates(999, 4, &mut rng).unwrap();
        assert!(candidates.is_cold_start());
        assert_eq!(candidates.items(), &[10, 11, 12, 13]);
    }

    #[test]
    fn test_exhausted_catalog_falls_back_to_cold_start() {
        let interactions = InteractionCatalog::from_records((1..=3).map(|id| InteractionRecord::new(5, id)));
        let selector = CandidateSelector::new(Arc::new(interactions), catalog(1..=3), ColdStartPolicy::Head);
        let mut rng = StdRng::seed_from_u64(1);

        assert!(selector.warm_candidates(5).is_empty());
        let candidates = selector.candidates(5, 2, &mut rng).unwrap();
        assert_eq!(candidates, Candidates::ColdStart(vec![1, 2]));
    }

    #[test]
    fn test_shuffle_policy_is_seeded() {
        let selector = selector(ColdStartPolicy::Shuffle);
        let a = selector.cold_start(5, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = selector.cold_start(5, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);

        let unique: HashSet<_> = a.iter().copied().collect();
        assert_eq!(unique.len(), 5);
        assert!(a.iter().all(|id| (10..=20).contains(id)));
    }

    #[test]
    fn test_cold_start_needs_enough_items() {
        let selector = selector(ColdStartPolicy::Head);
        let err = selector.cold_start(50, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert_eq!(
            err,
            RecommendError::InsufficientCandidates {
                requested: 50,
                available: 11
            }
        );
    }
}

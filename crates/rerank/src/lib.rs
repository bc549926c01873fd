//! Ranking of scored candidates.
//!
//! Two stages: keep the `pool_size` best candidates by score, then draw
//! `output_size` of them uniformly at random. Pure top-K would hand a
//! static model's users the same list on every request.

use gamerec_model::{ItemId, RecommendError, Result, ScoredCandidate};
use rand::Rng;
use std::cmp::Ordering;

/// Configuration for the ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankConfig {
    /// Size of the top-scored pool to sample from
    pub pool_size: usize,
    /// Number of items returned
    pub output_size: usize,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            pool_size: 30,
            output_size: 10,
        }
    }
}

/// Pair scores with their candidates.
pub fn zip_scores(candidates: &[ItemId], scores: &[f32]) -> Vec<ScoredCandidate> {
    candidates
        .iter()
        .zip(scores)
        .map(|(&item_id, &score)| ScoredCandidate { item_id, score })
        .collect()
}

/// Top `pool_size` candidates by descending score.
///
/// The sort is stable, so ties keep candidate order. Non-finite scores
/// sort after every finite one. `pool_size` is clamped to the input size.
pub fn top_pool(mut scored: Vec<ScoredCandidate>, pool_size: usize) -> Vec<ScoredCandidate> {
    scored.sort_by(|a, b| by_score_desc(a.score, b.score));
    scored.truncate(pool_size);
    scored
}

fn by_score_desc(a: f32, b: f32) -> Ordering {
    match (a.is_finite(), b.is_finite()) {
        (true, true) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}

/// Rank scored candidates into the final id list.
///
/// Fails with `InsufficientCandidates` when `output_size` exceeds the
/// (clamped) pool.
pub fn rank<R: Rng + ?Sized>(
    scored: Vec<ScoredCandidate>,
    config: RankConfig,
    rng: &mut R,
) -> Result<Vec<ItemId>> {
    let available = scored.len();
    let pool_size = config.pool_size.min(available);
    if config.output_size > pool_size {
        return Err(RecommendError::InsufficientCandidates {
            requested: config.output_size,
            available: pool_size,
        });
    }

    let pool = top_pool(scored, pool_size);
    let picked: Vec<ItemId> = rand::seq::index::sample(rng, pool.len(), config.output_size)
        .into_iter()
        .map(|i| pool[i].item_id)
        .collect();

    tracing::debug!(
        available,
        pool_size,
        output_size = picked.len(),
        "Ranked candidates"
    );
    Ok(picked)
}

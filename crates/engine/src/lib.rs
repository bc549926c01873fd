//! Recommendation request API.
//!
//! `Recommender` composes the pipeline stages:
//! candidate selection -> preference scoring -> ranking -> detail lookup.
//! Catalogs and the scorer are injected at construction and only read
//! afterwards, so one `Recommender` can serve concurrent requests.

pub use gamerec_candidates::ColdStartPolicy;
pub use gamerec_details::RecommendationView;

use gamerec_candidates::{CandidateSelector, Candidates};
use gamerec_catalog::{InteractionCatalog, ItemCatalog};
use gamerec_details::DetailResolver;
use gamerec_model::{parse_user_id, GameDetails, RecommendError, Recommendation, Result, Strategy, UserId};
use gamerec_rerank::{rank, zip_scores, RankConfig};
use gamerec_scorer::{PreferenceScorer, ScorerConfig, SharedModel};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the recommender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommenderConfig {
    /// Top-scored pool the output is sampled from
    pub pool_size: usize,
    /// Output size used when the caller does not pick one
    pub default_output_size: usize,
    pub cold_start: ColdStartPolicy,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            pool_size: 30,
            default_output_size: 10,
            cold_start: ColdStartPolicy::Head,
        }
    }
}

/// Locations of the startup artifacts.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub interactions: PathBuf,
    pub catalog: PathBuf,
    pub model: PathBuf,
}

/// The recommendation pipeline.
pub struct Recommender<S = SharedModel> {
    selector: CandidateSelector,
    scorer: S,
    resolver: DetailResolver,
    config: RecommenderConfig,
}

impl Recommender<SharedModel> {
    /// Load both tables and prepare a lazily loaded model.
    ///
    /// Table errors are reported here; model errors surface on the first
    /// scored request or on `warm_up`.
    pub fn from_paths(paths: &DataPaths, config: RecommenderConfig, scorer_config: ScorerConfig) -> Result<Self> {
        let interactions = Arc::new(InteractionCatalog::from_csv_path(&paths.interactions)?);
        let catalog = Arc::new(ItemCatalog::from_csv_path(&paths.catalog)?);
        let scorer = SharedModel::new(&paths.model, scorer_config);
        Ok(Self::new(interactions, catalog, scorer, config))
    }

    /// Load the model now instead of on first use.
    pub fn warm_up(&self) -> Result<()> {
        self.scorer.get().map(|_| ())
    }
}

impl<S: PreferenceScorer> Recommender<S> {
    pub fn new(
        interactions: Arc<InteractionCatalog>,
        catalog: Arc<ItemCatalog>,
        scorer: S,
        config: RecommenderConfig,
    ) -> Self {
        Self {
            selector: CandidateSelector::new(interactions, Arc::clone(&catalog), config.cold_start),
            scorer,
            resolver: DetailResolver::new(catalog),
            config,
        }
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn catalog(&self) -> &ItemCatalog {
        self.resolver.catalog()
    }

    /// Recommend `output_size` games for a user id string.
    pub fn get_recommendations(&self, user_id: &str, output_size: usize) -> Result<Vec<GameDetails>> {
        self.get_recommendations_with_rng(user_id, output_size, &mut rand::thread_rng())
    }

    /// As `get_recommendations`, drawing randomness from `rng`.
    pub fn get_recommendations_with_rng<R: Rng + ?Sized>(
        &self,
        user_id: &str,
        output_size: usize,
        rng: &mut R,
    ) -> Result<Vec<GameDetails>> {
        self.recommend_view(user_id, output_size, rng).map(|view| view.games)
    }

    /// Recommendations with a headline and the strategy that produced them.
    pub fn recommend_view<R: Rng + ?Sized>(
        &self,
        user_id: &str,
        output_size: usize,
        rng: &mut R,
    ) -> Result<RecommendationView> {
        let user_id = parse_user_id(user_id)?;
        let recommendation = self.recommend_ids(user_id, output_size, rng)?;
        let games = self.resolver.resolve(&recommendation.items)?;
        Ok(RecommendationView::new(recommendation.strategy, games))
    }

    /// Ranked item ids for a user.
    pub fn recommend_ids<R: Rng + ?Sized>(
        &self,
        user_id: UserId,
        output_size: usize,
        rng: &mut R,
    ) -> Result<Recommendation> {
        let (strategy, items) = match self.selector.candidates(user_id, output_size, rng)? {
            Candidates::ColdStart(items) => (Strategy::ColdStart, items),
            Candidates::Warm(candidates) => match self.scorer.score(user_id, &candidates) {
                Ok(scores) => {
                    if scores.len() != candidates.len() {
                        return Err(RecommendError::artifact(
                            self.scorer.name(),
                            format!("returned {} scores for {} candidates", scores.len(), candidates.len()),
                        ));
                    }
                    let config = RankConfig {
                        pool_size: self.config.pool_size,
                        output_size,
                    };
                    (Strategy::Personalized, rank(zip_scores(&candidates, &scores), config, rng)?)
                }
                Err(RecommendError::EmptyCandidateSet) => {
                    (Strategy::ColdStart, self.selector.cold_start(output_size, rng)?)
                }
                Err(e) => return Err(e),
            },
        };

        tracing::info!(
            user_id,
            strategy = ?strategy,
            items = items.len(),
            scorer = self.scorer.name(),
            "Produced recommendation"
        );
        Ok(Recommendation {
            user_id,
            strategy,
            items,
        })
    }
}

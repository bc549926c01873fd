//! Display details for recommended games.
//!
//! Joins ranked item ids against the item catalog to produce the
//! (title, image, price) tuples a front end shows, plus a plain-text
//! rendering for terminals.

use gamerec_catalog::ItemCatalog;
use gamerec_model::{GameDetails, ItemId, RecommendError, Result, Strategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resolves item ids to display details.
#[derive(Debug, Clone)]
pub struct DetailResolver {
    catalog: Arc<ItemCatalog>,
}

impl DetailResolver {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        Self { catalog }
    }

    /// Details for each id, in input order.
    ///
    /// Any id missing from the catalog fails the whole call.
    pub fn resolve(&self, item_ids: &[ItemId]) -> Result<Vec<GameDetails>> {
        item_ids
            .iter()
            .map(|&id| {
                self.catalog
                    .get(id)
                    .map(GameDetails::from)
                    .ok_or(RecommendError::UnknownItemId(id))
            })
            .collect()
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }
}

/// A labelled set of details, ready to print or serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationView {
    /// Short heading (1 line)
    pub headline: String,

    pub strategy: Strategy,

    pub games: Vec<GameDetails>,
}

impl RecommendationView {
    pub fn new(strategy: Strategy, games: Vec<GameDetails>) -> Self {
        let headline = match strategy {
            Strategy::Personalized => format!("Top {} picks for you", games.len()),
            Strategy::ColdStart => format!("{} games to get you started", games.len()),
        };
        Self {
            headline,
            strategy,
            games,
        }
    }

    /// Numbered text lines, one per game.
    pub fn render_lines(&self) -> Vec<String> {
        self.games
            .iter()
            .enumerate()
            .map(|(i, game)| format!("{:>2}. {} [{}] ({})", i + 1, game.title, game.price, game.image_url))
            .collect()
    }
}

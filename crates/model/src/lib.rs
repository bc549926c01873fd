//! Core domain model for gamerec.
//!
//! This crate defines the fundamental types used throughout the system:
//! - `InteractionRecord`: a (user, item) play/ownership record
//! - `CatalogEntry` and `Price`: item metadata from the catalog table
//! - `ScoredCandidate`: a candidate item with its relevance score
//! - `Recommendation`: the ranked id list produced for one request
//! - `GameDetails`: the display-ready tuple handed to a front end
//! - `RecommendError`: the error taxonomy shared by every pipeline stage

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Numeric user identifier (Steam ids fit in 64 bits).
pub type UserId = u64;

/// Numeric item identifier (Steam app id).
pub type ItemId = u64;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RecommendError>;

/// Which id space an out-of-range id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    User,
    Item,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Item => f.write_str("item"),
        }
    }
}

/// Errors surfaced by the recommendation pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecommendError {
    /// Id outside the embedding universe the model was trained on.
    #[error("{kind} id {id} is outside the trained embedding range")]
    OutOfRangeId { kind: IdKind, id: u64 },

    /// Nothing left to score.
    #[error("candidate set is empty")]
    EmptyCandidateSet,

    #[error("requested {requested} items but only {available} candidates are available")]
    InsufficientCandidates { requested: usize, available: usize },

    /// Ranked id missing from the catalog snapshot.
    #[error("item {0} is not present in the catalog")]
    UnknownItemId(ItemId),

    /// Missing or malformed model artifact or data table.
    #[error("failed to load {path}: {reason}")]
    ArtifactLoad { path: String, reason: String },

    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),
}

impl RecommendError {
    /// Build an `ArtifactLoad` error from anything displayable.
    pub fn artifact(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::ArtifactLoad {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A historical (user, item) interaction.
///
/// Produced by data ingestion; never mutated at inference time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: UserId,

    pub item_id: ItemId,

    /// Implicit strength (e.g. minutes played)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
}

impl InteractionRecord {
    pub fn new(user_id: UserId, item_id: ItemId) -> Self {
        Self {
            user_id,
            item_id,
            strength: None,
        }
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = Some(strength);
        self
    }
}

/// Sentinel used by the catalog table for free-to-play items.
pub const FREE_SENTINEL: &str = "FREE";

/// Item price, normalized to whole cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Price {
    Paid { cents: u64 },
    Free,
}

impl Price {
    /// Round a decimal amount to two places.
    pub fn from_amount(amount: f64) -> Option<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        let cents = (amount * 100.0).round();
        // `as` saturates; anything at or past u64::MAX is not a real price.
        if cents >= u64::MAX as f64 {
            return None;
        }
        Some(Self::Paid { cents: cents as u64 })
    }

    /// Parse a raw table value: either the `FREE` sentinel (any case) or a number.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(FREE_SENTINEL) {
            return Some(Self::Free);
        }
        trimmed.parse::<f64>().ok().and_then(Self::from_amount)
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paid { cents } => write!(f, "{}.{:02}", cents / 100, cents % 100),
            Self::Free => f.write_str(FREE_SENTINEL),
        }
    }
}

impl Serialize for Price {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Price::parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid price: {raw:?}")))
    }
}

/// One row of the item catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub item_id: ItemId,
    pub title: String,
    pub image_url: String,
    pub price: Price,
}

impl CatalogEntry {
    pub fn new(item_id: ItemId, title: impl Into<String>, image_url: impl Into<String>, price: Price) -> Self {
        Self {
            item_id,
            title: title.into(),
            image_url: image_url.into(),
            price,
        }
    }
}

/// A candidate item with its model score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub item_id: ItemId,
    pub score: f32,
}

/// How a recommendation was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Scored by the preference model
    Personalized,
    /// Catalog sample for users without history
    ColdStart,
}

/// Ranked item ids for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_id: UserId,
    pub strategy: Strategy,
    pub items: Vec<ItemId>,
}

/// Display-ready details for one recommended game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDetails {
    pub item_id: ItemId,
    pub title: String,
    pub image_url: String,
    pub price: Price,
}

impl From<&CatalogEntry> for GameDetails {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            item_id: entry.item_id,
            title: entry.title.clone(),
            image_url: entry.image_url.clone(),
            price: entry.price,
        }
    }
}

/// Parse the string form of a user id used by the request API.
pub fn parse_user_id(raw: &str) -> Result<UserId> {
    raw.trim()
        .parse()
        .map_err(|_| RecommendError::InvalidUserId(raw.to_string()))
}

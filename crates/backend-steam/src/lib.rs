//! Steam Web API backend.
//!
//! Provides the `ProfileLookup` trait used by front ends to show who a
//! recommendation is for, and a Steam implementation of it. The same
//! client can list a user's owned or recently played games as interaction
//! records, which is how new rows reach the interaction table.

use chrono::{DateTime, Utc};
use gamerec_model::InteractionRecord;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Errors from profile lookups.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No Steam profile for id {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Public profile details for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub steam_id: String,
    pub display_name: String,
    pub profile_url: String,
    /// Absent for private profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Identity/profile lookup.
///
/// Scoring never depends on this; it only enriches what is displayed.
pub trait ProfileLookup {
    /// Look up a user's public profile.
    fn lookup(&self, steam_id: &str) -> impl Future<Output = Result<UserProfile, ProfileError>> + Send;

    /// Get the backend name for logging.
    fn name(&self) -> &'static str;
}

/// Steam Web API configuration.
#[derive(Debug, Clone)]
pub struct SteamConfig {
    /// Base URL of the Web API
    pub base_url: String,
    /// Web API key
    pub api_key: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.steampowered.com".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct PlayerSummaries {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Debug, Deserialize)]
struct PlayerSummary {
    steamid: String,
    personaname: String,
    profileurl: String,
    #[serde(default)]
    timecreated: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwnedGames {
    #[serde(default)]
    games: Vec<OwnedGame>,
}

#[derive(Debug, Deserialize)]
struct OwnedGame {
    appid: u64,
    #[serde(default)]
    playtime_forever: u32,
}

#[derive(Debug, Deserialize)]
struct RecentGames {
    #[serde(default)]
    games: Vec<RecentGame>,
}

#[derive(Debug, Deserialize)]
struct RecentGame {
    appid: u64,
    #[serde(default)]
    playtime_2weeks: u32,
}

/// Steam Web API client.
pub struct SteamClient {
    config: SteamConfig,
    client: reqwest::Client,
}

impl SteamClient {
    /// Create a new Steam client.
    pub fn new(config: SteamConfig) -> Result<Self, ProfileError> {
        if config.api_key.trim().is_empty() {
            return Err(ProfileError::Config("Steam API key is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProfileError::Config(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, interface: &str, method: &str, version: &str) -> String {
        format!(
            "{}/{}/{}/{}/",
            self.config.base_url.trim_end_matches('/'),
            interface,
            method,
            version
        )
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, ProfileError> {
        tracing::debug!(url = %url, "Calling Steam Web API");

        let response = self
            .client
            .get(url)
            .query(&[("key", self.config.api_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| ProfileError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProfileError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| ProfileError::Parse(e.to_string()))
    }

    /// List a user's owned games as interaction records, with minutes
    /// played as strength.
    pub async fn owned_games(&self, steam_id: &str) -> Result<Vec<InteractionRecord>, ProfileError> {
        let url = self.endpoint("IPlayerService", "GetOwnedGames", "v0001");
        let json = self.get_json(&url, &[("steamid", steam_id), ("format", "json")]).await?;
        parse_owned_games(steam_id, json)
    }

    /// List games played in the last two weeks, with minutes played in
    /// that window as strength.
    pub async fn recent_games(&self, steam_id: &str) -> Result<Vec<InteractionRecord>, ProfileError> {
        let url = self.endpoint("IPlayerService", "GetRecentlyPlayedGames", "v0001");
        let json = self.get_json(&url, &[("steamid", steam_id), ("format", "json")]).await?;
        parse_recent_games(steam_id, json)
    }
}

impl ProfileLookup for SteamClient {
    async fn lookup(&self, steam_id: &str) -> Result<UserProfile, ProfileError> {
        let url = self.endpoint("ISteamUser", "GetPlayerSummaries", "v0002");
        let json = self.get_json(&url, &[("steamids", steam_id)]).await?;
        parse_player_summary(steam_id, json)
    }

    fn name(&self) -> &'static str {
        "steam"
    }
}

/// Extract the first player from a `GetPlayerSummaries` response.
fn parse_player_summary(steam_id: &str, json: serde_json::Value) -> Result<UserProfile, ProfileError> {
    let envelope: Envelope<PlayerSummaries> =
        serde_json::from_value(json).map_err(|e| ProfileError::Parse(e.to_string()))?;

    let player = envelope
        .response
        .players
        .into_iter()
        .next()
        .ok_or_else(|| ProfileError::NotFound(steam_id.to_string()))?;

    let created_at = match player.timecreated {
        Some(secs) => Some(
            DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| ProfileError::Parse(format!("invalid timecreated {secs}")))?,
        ),
        None => None,
    };

    Ok(UserProfile {
        steam_id: player.steamid,
        display_name: player.personaname,
        profile_url: player.profileurl,
        created_at,
    })
}

/// Turn a `GetOwnedGames` response into interaction records.
///
/// Private libraries come back as an empty response and yield no rows.
fn parse_owned_games(steam_id: &str, json: serde_json::Value) -> Result<Vec<InteractionRecord>, ProfileError> {
    let user_id = numeric_steam_id(steam_id)?;
    let envelope: Envelope<OwnedGames> =
        serde_json::from_value(json).map_err(|e| ProfileError::Parse(e.to_string()))?;

    Ok(envelope
        .response
        .games
        .into_iter()
        .map(|game| InteractionRecord::new(user_id, game.appid).with_strength(game.playtime_forever as f32))
        .collect())
}

/// Turn a `GetRecentlyPlayedGames` response into interaction records.
fn parse_recent_games(steam_id: &str, json: serde_json::Value) -> Result<Vec<InteractionRecord>, ProfileError> {
    let user_id = numeric_steam_id(steam_id)?;
    let envelope: Envelope<RecentGames> =
        serde_json::from_value(json).map_err(|e| ProfileError::Parse(e.to_string()))?;

    Ok(envelope
        .response
        .games
        .into_iter()
        .map(|game| InteractionRecord::new(user_id, game.appid).with_strength(game.playtime_2weeks as f32))
        .collect())
}

fn numeric_steam_id(steam_id: &str) -> Result<u64, ProfileError> {
    steam_id
        .trim()
        .parse()
        .map_err(|_| ProfileError::Parse(format!("steam id {steam_id:?} is not numeric")))
}

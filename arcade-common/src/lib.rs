// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod counter;
pub mod error;
pub mod leaderboard;
pub mod store;

pub use counter::{CounterService, Increment};
pub use error::LeaderboardError;
pub use leaderboard::{LeaderboardService, Submission};
pub use store::{DynamoKvStore, InMemoryKvStore, KvStore};

/// Maximum number of entries kept on the leaderboard.
pub const MAX_ENTRIES: usize = 10;
/// Longest initials accepted; longer input is truncated.
pub const MAX_INITIALS_LEN: usize = 3;
/// Count shown (and persisted) when the counter has never been written.
pub const FALLBACK_GAMES_PLAYED: i64 = 50;

pub const DEFAULT_GAMES_PLAYED_KEY: &str = "games_played";
pub const DEFAULT_LEADERBOARD_KEY: &str = "leaderboard";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub initials: String,
    pub score: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitScoreRequest {
    /// Left untyped so that wrong shapes surface as validation errors
    /// instead of body rejections.
    #[serde(default)]
    pub initials: Option<serde_json::Value>,
    #[serde(default)]
    pub score: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitScoreResponse {
    pub message: String,
    pub entry: LeaderboardEntry,
    /// 1-based position on the stored board, `None` when the score did not place.
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementResponse {
    pub message: String,
    pub previous_count: i64,
    pub new_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamesPlayedResponse {
    pub count: i64,
}

/// Read an environment variable, falling back to `default` when unset or blank.
pub fn env_or(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

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

//! Bounded top-N leaderboard kept under a single store key.
//!
//! A submission reads the whole board, inserts the new entry, re-sorts by
//! descending score, trims to capacity and writes the board back with a plain
//! `set`. There is no compare-and-swap on that path: two submissions that
//! read the same board race, and the later write wins.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    DEFAULT_LEADERBOARD_KEY, LeaderboardEntry, MAX_ENTRIES, MAX_INITIALS_LEN,
    SubmitScoreRequest, env_or, error::LeaderboardError, store::KvStore,
};

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub entry: LeaderboardEntry,
    /// 1-based rank on the stored board, `None` if the entry was trimmed off.
    pub rank: Option<usize>,
}

#[derive(Clone)]
pub struct LeaderboardService {
    store: Arc<dyn KvStore>,
    key: String,
    capacity: usize,
}

impl LeaderboardService {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            capacity: MAX_ENTRIES,
        }
    }

    pub fn from_env(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, env_or("LEADERBOARD_KEY", DEFAULT_LEADERBOARD_KEY))
            .with_capacity(parse_capacity())
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current board, highest score first.
    ///
    /// Stored data is re-sorted but never trimmed here; capacity is only
    /// enforced on write.
    pub async fn list(&self) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let mut entries = self.load().await?;
        sort_by_score(&mut entries);
        Ok(entries)
    }

    /// Validate an untyped request body and submit it.
    pub async fn submit_request(
        &self,
        request: &SubmitScoreRequest,
    ) -> Result<Submission, LeaderboardError> {
        let (initials, score) = parse_submission(request)?;
        self.submit(&initials, score).await
    }

    /// Record a score. The new entry is returned even when it did not make
    /// the cut.
    pub async fn submit(&self, initials: &str, score: u64) -> Result<Submission, LeaderboardError> {
        let initials = normalize_initials(initials)?;

        let mut entries = self.load().await?;
        let entry = LeaderboardEntry {
            initials,
            score,
            created_at: Utc::now(),
        };
        let rank = insert_ranked(&mut entries, entry.clone(), self.capacity);

        let payload =
            serde_json::to_value(&entries).context("failed to encode leaderboard")?;
        self.store
            .set(&self.key, &payload)
            .await
            .context("failed to write leaderboard")?;

        info!(
            key = %self.key,
            initials = %entry.initials,
            score = entry.score,
            rank = ?rank,
            size = entries.len(),
            "leaderboard entry submitted"
        );
        Ok(Submission { entry, rank })
    }

    async fn load(&self) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let stored = self
            .store
            .get(&self.key)
            .await
            .context("failed to read leaderboard")?;

        let Some(value) = stored else {
            debug!(key = %self.key, "leaderboard absent; starting empty");
            return Ok(Vec::new());
        };
        let entries = serde_json::from_value(value).context("stored leaderboard is malformed")?;
        Ok(entries)
    }
}

fn parse_capacity() -> usize {
    std::env::var("LEADERBOARD_CAPACITY")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(MAX_ENTRIES)
}

/// Stable sort, highest score first. Equal scores keep their stored order.
fn sort_by_score(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| b.score.cmp(&a.score));
}

/// Insert `entry` as if appended and stably re-sorted, then trim to
/// `capacity`. Returns the entry's 1-based rank if it survived the trim.
fn insert_ranked(
    entries: &mut Vec<LeaderboardEntry>,
    entry: LeaderboardEntry,
    capacity: usize,
) -> Option<usize> {
    sort_by_score(entries);
    // After every existing entry with an equal or higher score.
    let position = entries.partition_point(|existing| existing.score >= entry.score);
    entries.insert(position, entry);
    entries.truncate(capacity);
    (position < capacity).then_some(position + 1)
}

/// Upper-case and keep the first [`MAX_INITIALS_LEN`] characters.
/// Whitespace is kept as given; only the empty string is rejected.
pub fn normalize_initials(raw: &str) -> Result<String, LeaderboardError> {
    if raw.is_empty() {
        return Err(LeaderboardError::validation("initials are required"));
    }
    Ok(raw
        .to_uppercase()
        .chars()
        .take(MAX_INITIALS_LEN)
        .collect())
}

/// Pull initials and score out of an untyped request body.
pub fn parse_submission(request: &SubmitScoreRequest) -> Result<(String, u64), LeaderboardError> {
    let initials = match request.initials.as_ref() {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => return Err(LeaderboardError::validation("initials are required")),
    };
    if initials.is_empty() {
        return Err(LeaderboardError::validation("initials are required"));
    }

    let Some(Value::Number(number)) = request.score.as_ref() else {
        return Err(LeaderboardError::validation("score must be a number"));
    };
    let score = match number.as_u64() {
        Some(score) => score,
        None => match number.as_f64() {
            Some(score) if score >= 0.0 && score.fract() == 0.0 && score <= u64::MAX as f64 => {
                score as u64
            }
            _ => {
                return Err(LeaderboardError::validation(
                    "score must be a non-negative integer",
                ));
            }
        },
    };

    Ok((initials, score))
}

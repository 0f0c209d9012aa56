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

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use crate::{DEFAULT_GAMES_PLAYED_KEY, FALLBACK_GAMES_PLAYED, env_or, store::KvStore};

/// Result of a successful increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    pub previous: i64,
    pub current: i64,
}

/// Games-played counter stored under a single key.
#[derive(Clone)]
pub struct CounterService {
    store: Arc<dyn KvStore>,
    key: String,
}

impl CounterService {
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn from_env(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, env_or("GAMES_PLAYED_KEY", DEFAULT_GAMES_PLAYED_KEY))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn increment(&self) -> anyhow::Result<Increment> {
        let current = self
            .store
            .incr(&self.key)
            .await
            .context("failed to increment games played")?;
        Ok(Increment {
            previous: current - 1,
            current,
        })
    }

    /// Current count. An absent counter is initialized to
    /// [`FALLBACK_GAMES_PLAYED`] so the first visitors never see zero.
    pub async fn read(&self) -> anyhow::Result<i64> {
        let stored = self
            .store
            .get(&self.key)
            .await
            .context("failed to read games played")?;

        match stored {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("games played counter holds non-integer {value}")),
            None => {
                self.store
                    .set(&self.key, &Value::from(FALLBACK_GAMES_PLAYED))
                    .await
                    .context("failed to initialize games played")?;
                info!(
                    key = %self.key,
                    count = FALLBACK_GAMES_PLAYED,
                    "initialized games played counter"
                );
                Ok(FALLBACK_GAMES_PLAYED)
            }
        }
    }
}

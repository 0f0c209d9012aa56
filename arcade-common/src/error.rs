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

use thiserror::Error;

/// Failures surfaced by [`crate::LeaderboardService`].
#[derive(Error, Debug)]
pub enum LeaderboardError {
    /// The submission was rejected before the store was touched.
    #[error("{0}")]
    Validation(String),

    /// The key-value store could not be read or written.
    #[error("{0:#}")]
    Store(#[source] anyhow::Error),
}

impl LeaderboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<anyhow::Error> for LeaderboardError {
    fn from(error: anyhow::Error) -> Self {
        Self::Store(error)
    }
}

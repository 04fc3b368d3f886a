//! Per-player progress record.
//!
//! # Invariants
//! - `player_id` is non-blank and unique per store.
//! - Counters are never negative.
//! - `rank_index` is derived from `kills`; a value read from storage may be
//!   stale until the next reconciliation.

use crate::clock::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Counter columns that can be incremented atomically at the store layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressField {
    /// Drives the rank ladder.
    Kills,
    /// Informational only.
    Deaths,
}

impl ProgressField {
    pub fn column(self) -> &'static str {
        match self {
            Self::Kills => "kills",
            Self::Deaths => "deaths",
        }
    }
}

/// Persisted progression state for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgressRecord {
    pub player_id: String,
    pub rank_index: usize,
    pub kills: i64,
    pub deaths: i64,
    /// Unix epoch milliseconds of the last write.
    pub last_updated: i64,
    /// Unix epoch milliseconds of the last rank change, `None` until the first one.
    pub rank_achieved_at: Option<i64>,
}

impl PlayerProgressRecord {
    /// Zero-state record for a player seen for the first time.
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            rank_index: 0,
            kills: 0,
            deaths: 0,
            last_updated: now_epoch_ms(),
            rank_achieved_at: None,
        }
    }

    pub fn counter(&self, field: ProgressField) -> i64 {
        match field {
            ProgressField::Kills => self.kills,
            ProgressField::Deaths => self.deaths,
        }
    }

    /// Validates record invariants before persistence.
    pub fn validate(&self) -> Result<(), ProgressValidationError> {
        if self.player_id.trim().is_empty() {
            return Err(ProgressValidationError::BlankPlayerId);
        }
        if self.kills < 0 {
            return Err(ProgressValidationError::NegativeCounter("kills"));
        }
        if self.deaths < 0 {
            return Err(ProgressValidationError::NegativeCounter("deaths"));
        }
        Ok(())
    }
}

/// Record validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressValidationError {
    BlankPlayerId,
    NegativeCounter(&'static str),
    NonPositiveIncrement(i64),
}

impl Display for ProgressValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankPlayerId => write!(f, "player id must not be blank"),
            Self::NegativeCounter(field) => write!(f, "counter `{field}` must not be negative"),
            Self::NonPositiveIncrement(amount) => {
                write!(f, "increment amount must be positive, got {amount}")
            }
        }
    }
}

impl Error for ProgressValidationError {}

#[cfg(test)]
mod tests {
    use super::{PlayerProgressRecord, ProgressField, ProgressValidationError};

    #[test]
    fn new_record_starts_at_zero_state() {
        let record = PlayerProgressRecord::new("p1");
        assert_eq!(record.rank_index, 0);
        assert_eq!(record.counter(ProgressField::Kills), 0);
        assert_eq!(record.counter(ProgressField::Deaths), 0);
        assert!(record.rank_achieved_at.is_none());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_id_and_negative_counters() {
        let blank = PlayerProgressRecord::new("   ");
        assert_eq!(
            blank.validate().unwrap_err(),
            ProgressValidationError::BlankPlayerId
        );

        let mut negative = PlayerProgressRecord::new("p1");
        negative.deaths = -1;
        assert_eq!(
            negative.validate().unwrap_err(),
            ProgressValidationError::NegativeCounter("deaths")
        );
    }
}

//! Rank ladder model.
//!
//! # Responsibility
//! - Hold the static rank definitions of a progression ladder.
//! - Resolve the qualifying rank index for a counter value.
//!
//! # Invariants
//! - A ladder always has at least one rank; index 0 is the fallback rank.
//! - Lookup scans by descending threshold, independent of authoring order.
//!
//! The index-0 fallback assumes the first rank has threshold `0`. Ladders that
//! break this assumption are accepted, but a warning is logged at construction
//! and a counter below every threshold still resolves to index 0.

use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One static step of a progression ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDefinition {
    /// Display name, e.g. `Sergeant`.
    pub name: String,
    /// Minimum counter value required to hold this rank.
    pub threshold: i64,
    /// Inline color token used when rendering the rank in chat, e.g. `^4`.
    #[serde(default)]
    pub tag: String,
}

impl RankDefinition {
    pub fn new(name: impl Into<String>, threshold: i64, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            threshold,
            tag: tag.into(),
        }
    }

    /// Rank name wrapped in its color tag and reset to white.
    pub fn colored_name(&self) -> String {
        format!("{}{}^7", self.tag, self.name)
    }
}

/// Ladder construction errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LadderError {
    Empty,
    BlankName(usize),
}

impl Display for LadderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "rank ladder must contain at least one rank"),
            Self::BlankName(index) => write!(f, "rank at index {index} has a blank name"),
        }
    }
}

impl Error for LadderError {}

/// Ordered collection of rank definitions with a precomputed lookup order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankLadder {
    ranks: Vec<RankDefinition>,
    // Indices into `ranks`, by threshold descending. Ties keep the higher index first.
    descending: Vec<usize>,
}

impl RankLadder {
    /// Builds a ladder from ranks in authoring order.
    pub fn new(ranks: Vec<RankDefinition>) -> Result<Self, LadderError> {
        if ranks.is_empty() {
            return Err(LadderError::Empty);
        }
        if let Some(index) = ranks.iter().position(|rank| rank.name.trim().is_empty()) {
            return Err(LadderError::BlankName(index));
        }
        if ranks[0].threshold != 0 {
            warn!(
                "event=ladder_build module=model status=warn reason=fallback_threshold_nonzero threshold={}",
                ranks[0].threshold
            );
        }

        let mut descending: Vec<usize> = (0..ranks.len()).collect();
        descending.sort_by(|a, b| ranks[*b].threshold.cmp(&ranks[*a].threshold).then(b.cmp(a)));

        Ok(Self { ranks, descending })
    }

    /// Default military-style ladder used when no `ranks` config is given.
    pub fn default_ladder() -> Self {
        let ranks = vec![
            RankDefinition::new("Recruit", 0, "^7"),
            RankDefinition::new("Private", 50, "^2"),
            RankDefinition::new("Corporal", 150, "^2"),
            RankDefinition::new("Sergeant", 500, "^4"),
            RankDefinition::new("Lieutenant", 1_000, "^4"),
            RankDefinition::new("Captain", 2_500, "^6"),
            RankDefinition::new("Major", 5_000, "^6"),
            RankDefinition::new("Colonel", 10_000, "^3"),
            RankDefinition::new("General", 25_000, "^1"),
        ];
        Self {
            descending: (0..ranks.len()).rev().collect(),
            ranks,
        }
    }

    /// Returns the highest-threshold rank index whose threshold is `<= counter`.
    ///
    /// Falls back to index 0 when no rank qualifies.
    pub fn qualifying_index(&self, counter: i64) -> usize {
        self.descending
            .iter()
            .copied()
            .find(|index| self.ranks[*index].threshold <= counter)
            .unwrap_or(0)
    }

    /// Rank at `index`, clamped to the fallback rank for out-of-range indices.
    pub fn rank(&self, index: usize) -> &RankDefinition {
        self.ranks.get(index).unwrap_or(&self.ranks[0])
    }

    /// Next rank above `index` in authoring order, if any.
    pub fn next_rank(&self, index: usize) -> Option<&RankDefinition> {
        self.ranks.get(index + 1)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn ranks(&self) -> &[RankDefinition] {
        &self.ranks
    }
}

#[cfg(test)]
mod tests {
    use super::{LadderError, RankDefinition, RankLadder};

    fn scenario_ladder() -> RankLadder {
        RankLadder::new(vec![
            RankDefinition::new("Recruit", 0, "^7"),
            RankDefinition::new("Private", 50, "^2"),
            RankDefinition::new("Sergeant", 500, "^4"),
        ])
        .expect("valid ladder")
    }

    #[test]
    fn resolves_highest_qualifying_rank() {
        let ladder = scenario_ladder();
        assert_eq!(ladder.qualifying_index(0), 0);
        assert_eq!(ladder.qualifying_index(49), 0);
        assert_eq!(ladder.qualifying_index(50), 1);
        assert_eq!(ladder.qualifying_index(499), 1);
        assert_eq!(ladder.qualifying_index(500), 2);
        assert_eq!(ladder.qualifying_index(1_000_000), 2);
    }

    #[test]
    fn evaluates_by_threshold_not_authoring_order() {
        let ladder = RankLadder::new(vec![
            RankDefinition::new("Recruit", 0, ""),
            RankDefinition::new("Veteran", 500, ""),
            RankDefinition::new("Private", 50, ""),
        ])
        .expect("valid ladder");
        assert_eq!(ladder.qualifying_index(60), 2);
        assert_eq!(ladder.qualifying_index(600), 1);
    }

    #[test]
    fn falls_back_to_index_zero_below_every_threshold() {
        let ladder = RankLadder::new(vec![
            RankDefinition::new("Initiate", 10, ""),
            RankDefinition::new("Adept", 100, ""),
        ])
        .expect("nonzero fallback threshold is accepted");
        assert_eq!(ladder.qualifying_index(0), 0);
        assert_eq!(ladder.qualifying_index(-5), 0);
        assert_eq!(ladder.qualifying_index(100), 1);
    }

    #[test]
    fn rank_index_never_regresses_for_growing_counters() {
        let ladder = RankLadder::default_ladder();
        let mut previous = 0;
        for counter in (0..30_000).step_by(7) {
            let index = ladder.qualifying_index(counter);
            assert!(index >= previous, "rank regressed at counter {counter}");
            previous = index;
        }
        assert_eq!(previous, ladder.len() - 1);
    }

    #[test]
    fn rejects_empty_and_blank_ladders() {
        assert_eq!(RankLadder::new(vec![]).unwrap_err(), LadderError::Empty);
        let err = RankLadder::new(vec![
            RankDefinition::new("Recruit", 0, ""),
            RankDefinition::new("  ", 5, ""),
        ])
        .unwrap_err();
        assert_eq!(err, LadderError::BlankName(1));
    }

    #[test]
    fn default_ladder_matches_explicit_construction() {
        let default = RankLadder::default_ladder();
        let rebuilt = RankLadder::new(default.ranks().to_vec()).expect("valid ladder");
        assert_eq!(default, rebuilt);
    }

    #[test]
    fn deserializes_definitions_without_tag() {
        let ranks: Vec<RankDefinition> = serde_json::from_str(
            r#"[{"name":"Recruit","threshold":0},{"name":"Private","threshold":50,"tag":"^2"}]"#,
        )
        .expect("valid rank json");
        assert_eq!(ranks[0].tag, "");
        assert_eq!(ranks[1].colored_name(), "^2Private^7");
    }
}

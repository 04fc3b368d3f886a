//! Typed view of the Ranks extension configuration.

use crate::extension::lifecycle::{ExtensionConfig, ExtensionError, ExtensionResult};
use crate::model::rank::{RankDefinition, RankLadder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Ranks settings. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RanksConfig {
    /// Ladder in authoring order; index 0 is the fallback rank.
    pub ranks: Vec<RankDefinition>,
    /// Seconds between background reconciliations. `0` disables the timer.
    pub reconcile_interval_secs: u64,
    /// Append rank notifications to the event store.
    pub persist_events: bool,
    /// Send a chat line when a kill promotes the killer.
    pub announce_promotions: bool,
    /// Greet connecting players with their rank.
    pub greet_on_connect: bool,
    /// Default size of the leaderboard route and listing.
    pub leaderboard_size: u32,
    /// SQLite file used when the host registers no shared progress
    /// repository. `None` keeps progress in memory.
    pub database_path: Option<String>,
}

impl Default for RanksConfig {
    fn default() -> Self {
        Self {
            ranks: RankLadder::default_ladder().ranks().to_vec(),
            reconcile_interval_secs: 300,
            persist_events: false,
            announce_promotions: true,
            greet_on_connect: false,
            leaderboard_size: 10,
            database_path: None,
        }
    }
}

impl RanksConfig {
    /// Defaults as a configuration object, the base that overrides merge into.
    pub fn defaults_map() -> ExtensionConfig {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => ExtensionConfig::new(),
        }
    }

    /// Parses the merged configuration. Errors name the offending key when it
    /// can be isolated, `ranks_config` otherwise.
    pub fn from_config(config: &ExtensionConfig) -> ExtensionResult<Self> {
        serde_json::from_value(Value::Object(config.clone())).map_err(|err| {
            let key = offending_key(config).unwrap_or("ranks_config");
            ExtensionError::invalid_config(key, err)
        })
    }

    pub fn ladder(&self) -> ExtensionResult<RankLadder> {
        Ok(RankLadder::new(self.ranks.clone())?)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

// First key that fails to parse on its own over the defaults.
fn offending_key(config: &ExtensionConfig) -> Option<&str> {
    config.iter().find_map(|(key, value)| {
        let mut single = RanksConfig::defaults_map();
        single.insert(key.clone(), value.clone());
        serde_json::from_value::<RanksConfig>(Value::Object(single))
            .is_err()
            .then_some(key.as_str())
    })
}

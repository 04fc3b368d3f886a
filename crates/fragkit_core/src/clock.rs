//! Wall-clock helpers shared by records and events.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current time as Unix epoch milliseconds.
///
/// A clock set before the epoch yields `0` instead of failing.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

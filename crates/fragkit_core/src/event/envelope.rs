//! Event envelope and type namespacing.

use crate::clock::now_epoch_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix applied to unqualified event types emitted by extensions.
pub const PLUGIN_NAMESPACE: &str = "plugin";

/// Identity of the extension that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub name: String,
    pub version: String,
}

/// One published occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-namespaced type, e.g. `player.kill` or `plugin.ranks.rankUpdated`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    /// `None` for occurrences published by the host itself.
    pub source: Option<EventSource>,
    /// Whether a durable copy was appended before dispatch.
    pub persisted: bool,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: now_epoch_ms(),
            source: None,
            persisted: false,
        }
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Reads a string payload field, treating blanks as absent.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Durable copy of an event returned by an event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
    pub source: Option<String>,
}

/// Rewrites an unqualified type to `plugin.<lowercase extension>.<type>`.
///
/// Types that already contain a `.` are returned unchanged.
pub fn qualify_event_type(extension_name: &str, event_type: &str) -> String {
    if event_type.contains('.') {
        return event_type.to_string();
    }
    format!(
        "{PLUGIN_NAMESPACE}.{}.{event_type}",
        extension_name.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::{qualify_event_type, Event};
    use serde_json::json;

    #[test]
    fn namespaces_unqualified_types() {
        assert_eq!(
            qualify_event_type("Ranks", "rankUpdated"),
            "plugin.ranks.rankUpdated"
        );
    }

    #[test]
    fn keeps_qualified_types() {
        assert_eq!(qualify_event_type("Ranks", "player.kill"), "player.kill");
        assert_eq!(
            qualify_event_type("Ranks", "plugin.enabled"),
            "plugin.enabled"
        );
    }

    #[test]
    fn payload_str_ignores_blank_and_non_string_values() {
        let event = Event::new(
            "player.kill",
            json!({ "killer_id": "p1", "victim_id": "  ", "weapon": 7 }),
        );
        assert_eq!(event.payload_str("killer_id"), Some("p1"));
        assert_eq!(event.payload_str("victim_id"), None);
        assert_eq!(event.payload_str("weapon"), None);
        assert_eq!(event.payload_str("missing"), None);
    }

    #[test]
    fn serializes_type_field_name() {
        let value = serde_json::to_value(Event::new("match.end", json!({}))).unwrap();
        assert_eq!(value["type"], "match.end");
        assert_eq!(value["persisted"], false);
    }
}

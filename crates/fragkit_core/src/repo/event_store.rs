//! Durable event log contract and SQLite implementation.
//!
//! # Invariants
//! - `append` assigns a fresh v4 id and never mutates existing rows.
//! - Payloads are stored as JSON text and must round-trip through serde_json.

use crate::db::{open_db, open_db_in_memory};
use crate::event::envelope::{Event, StoredEvent};
use crate::repo::progress_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Append-only store used by `EventBus::publish_and_persist`.
pub trait EventStore: Send + Sync {
    fn append(&self, event: &Event) -> RepoResult<StoredEvent>;
}

/// SQLite-backed event log.
pub struct SqliteEventStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteEventStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Most recent events first.
    pub fn recent(&self, limit: u32) -> RepoResult<Vec<StoredEvent>> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(RepoError::Closed)?;
        let mut stmt = conn.prepare(
            "SELECT event_id, event_type, payload, source, occurred_at
             FROM event_log
             ORDER BY occurred_at DESC, rowid DESC
             LIMIT ?1;",
        )?;
        let rows = stmt.query_map([i64::from(limit)], |row| {
            Ok((
                row.get::<_, String>("event_id")?,
                row.get::<_, String>("event_type")?,
                row.get::<_, String>("payload")?,
                row.get::<_, Option<String>>("source")?,
                row.get::<_, i64>("occurred_at")?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id_text, event_type, payload_text, source, timestamp) = row?;
            let id = Uuid::parse_str(&id_text).map_err(|_| {
                RepoError::InvalidData(format!("invalid event id `{id_text}` in event_log"))
            })?;
            let payload = serde_json::from_str(&payload_text).map_err(|err| {
                RepoError::InvalidData(format!("invalid payload for event `{id_text}`: {err}"))
            })?;
            events.push(StoredEvent {
                id,
                event_type,
                payload,
                timestamp,
                source,
            });
        }
        Ok(events)
    }

    /// Closes the connection; later appends fail with `RepoError::Closed`.
    pub fn close(&self) -> RepoResult<()> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(conn) => conn.close().map_err(|(_conn, err)| err.into()),
            None => Ok(()),
        }
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: &Event) -> RepoResult<StoredEvent> {
        let payload_text = serde_json::to_string(&event.payload)
            .map_err(|err| RepoError::InvalidData(format!("unserializable payload: {err}")))?;
        let stored = StoredEvent {
            id: Uuid::new_v4(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            timestamp: event.timestamp,
            source: event.source.as_ref().map(|source| source.name.clone()),
        };

        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(RepoError::Closed)?;
        conn.execute(
            "INSERT INTO event_log (event_id, event_type, payload, source, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                stored.id.to_string(),
                stored.event_type.as_str(),
                payload_text,
                stored.source.as_deref(),
                stored.timestamp,
            ],
        )?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::{EventStore, SqliteEventStore};
    use crate::event::envelope::{Event, EventSource};
    use crate::repo::progress_repo::RepoError;
    use serde_json::json;

    #[test]
    fn append_and_read_back() {
        let store = SqliteEventStore::in_memory().expect("store");
        let event = Event::new("plugin.ranks.rankUpdated", json!({ "player_id": "p1" }))
            .with_source(EventSource {
                name: "Ranks".to_string(),
                version: "1.0.0".to_string(),
            });
        let stored = store.append(&event).expect("append");

        let recent = store.recent(5).expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, stored.id);
        assert_eq!(recent[0].payload["player_id"], "p1");
        assert_eq!(recent[0].source.as_deref(), Some("Ranks"));
    }

    #[test]
    fn append_after_close_fails() {
        let store = SqliteEventStore::in_memory().expect("store");
        store.close().expect("close");
        let err = store
            .append(&Event::new("player.kill", json!({})))
            .unwrap_err();
        assert!(matches!(err, RepoError::Closed));
    }
}

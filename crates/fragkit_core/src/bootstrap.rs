//! Standard service wiring for hosts that run fully in process.
//!
//! Every well-known service is registered before any extension is built.
//! Chat goes to a bounded in-memory sink unless the host injects its own
//! `MessageSink` with `CoreServices::with_message_sink`.

use crate::event::bus::EventBus;
use crate::extension::api::{ApiSurface, RouteTable};
use crate::locator::{
    ServiceLocator, SERVICE_API, SERVICE_EVENT_BUS, SERVICE_LOGGER, SERVICE_MESSAGING,
    SERVICE_PROGRESS_REPOSITORY,
};
use crate::logging::{FacadeLogSink, LogSink};
use crate::messaging::{MemoryMessageSink, MessageSink};
use crate::repo::event_store::{EventStore, SqliteEventStore};
use crate::repo::progress_repo::{ProgressRepository, RepoResult, SqliteProgressRepository};
use std::path::Path;
use std::sync::Arc;

/// Handles to the services registered in `locator`.
pub struct CoreServices {
    pub locator: Arc<ServiceLocator>,
    pub bus: Arc<EventBus>,
    pub routes: Arc<RouteTable>,
    /// Default chat sink; only receives lines while it is the registered
    /// `messaging` service.
    pub chat: Arc<MemoryMessageSink>,
    pub progress: Arc<SqliteProgressRepository>,
    pub events: Arc<SqliteEventStore>,
}

impl CoreServices {
    /// All stores in memory.
    pub fn in_memory() -> RepoResult<Self> {
        Self::assemble(
            SqliteProgressRepository::in_memory()?,
            SqliteEventStore::in_memory()?,
        )
    }

    /// Progress and event log share one database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        Self::assemble(
            SqliteProgressRepository::open(path)?,
            SqliteEventStore::open(path)?,
        )
    }

    fn assemble(progress: SqliteProgressRepository, events: SqliteEventStore) -> RepoResult<Self> {
        let progress = Arc::new(progress);
        let events = Arc::new(events);
        let bus = Arc::new(EventBus::with_store(Arc::clone(&events) as Arc<dyn EventStore>));
        let routes = Arc::new(RouteTable::new());
        let chat = Arc::new(MemoryMessageSink::new());

        let locator = Arc::new(ServiceLocator::new());
        locator.register(
            SERVICE_LOGGER,
            Arc::new(FacadeLogSink::new()) as Arc<dyn LogSink>,
        );
        locator.register(SERVICE_EVENT_BUS, Arc::clone(&bus));
        locator.register(SERVICE_MESSAGING, Arc::clone(&chat) as Arc<dyn MessageSink>);
        locator.register(SERVICE_API, Arc::clone(&routes) as Arc<dyn ApiSurface>);
        locator.register(
            SERVICE_PROGRESS_REPOSITORY,
            Arc::clone(&progress) as Arc<dyn ProgressRepository>,
        );

        Ok(Self {
            locator,
            bus,
            routes,
            chat,
            progress,
            events,
        })
    }

    /// Replaces the `messaging` service, e.g. with an RCON-backed sink.
    /// Call before extensions are constructed.
    pub fn with_message_sink(self, sink: Arc<dyn MessageSink>) -> Self {
        self.locator.register(SERVICE_MESSAGING, sink);
        self
    }

    /// Closes the shared stores. Extensions must be shut down first.
    pub fn close(&self) -> RepoResult<()> {
        self.progress.close()?;
        self.events.close()
    }
}

#[cfg(test)]
mod tests {
    use super::CoreServices;
    use crate::event::bus::EventBus;
    use crate::locator::{SERVICE_API, SERVICE_EVENT_BUS, SERVICE_MESSAGING};
    use crate::messaging::{MemoryMessageSink, MessageSink};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn registers_well_known_services() {
        let services = CoreServices::in_memory().unwrap();
        let bus: Arc<EventBus> = services.locator.get(SERVICE_EVENT_BUS).unwrap();
        assert!(Arc::ptr_eq(&bus, &services.bus));
        assert!(services.locator.contains(SERVICE_API));
        assert!(services
            .locator
            .try_get::<Arc<dyn MessageSink>>(SERVICE_MESSAGING)
            .is_some());
    }

    #[test]
    fn injected_message_sink_replaces_the_default() {
        let custom = Arc::new(MemoryMessageSink::with_capacity(4));
        let services = CoreServices::in_memory()
            .unwrap()
            .with_message_sink(Arc::clone(&custom) as Arc<dyn MessageSink>);

        let sink: Arc<dyn MessageSink> = services.locator.get(SERVICE_MESSAGING).unwrap();
        sink.send_chat("srv", "hello").unwrap();
        assert_eq!(custom.lines().len(), 1);
        assert!(services.chat.lines().is_empty());
    }

    #[test]
    fn persisted_publishes_reach_the_event_log() {
        let services = CoreServices::in_memory().unwrap();
        let stored = services
            .bus
            .publish_and_persist("match.start", json!({"map": "q3dm17"}), true)
            .expect("stored");
        let recent = services.events.recent(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, stored.id);
        services.close().unwrap();
    }

    #[test]
    fn file_backed_services_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragkit.sqlite3");
        let services = CoreServices::open(&path).unwrap();
        services
            .bus
            .publish_and_persist("match.start", json!({}), true)
            .expect("stored");
        services.close().unwrap();
        assert!(path.exists());
    }
}

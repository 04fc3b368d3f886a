//! In-process event bus.
//!
//! # Responsibility
//! - Keep per-type subscriber lists and dispatch published events to them.
//! - Isolate subscriber failures (errors and panics) from each other.
//! - Append events to an optional durable store.
//!
//! # Invariants
//! - Dispatch runs on the publishing thread, one subscriber after another.
//! - The subscriber lock is never held while a handler runs, so handlers may
//!   publish or subscribe re-entrantly.
//! - A revoked `Subscription` is never invoked by a publish that starts after
//!   the revocation returned.

use crate::event::envelope::{qualify_event_type, Event, EventSource, StoredEvent};
use crate::repo::event_store::EventStore;
use crate::repo::progress_repo::RepoError;
use log::{debug, error, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Callback invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Failure reported by a subscriber; logged by the bus and never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for HandlerError {}

impl From<RepoError> for HandlerError {
    fn from(value: RepoError) -> Self {
        Self::new(value.to_string())
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Per-publish delivery counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub faulted: usize,
}

struct SubscriberEntry {
    id: u64,
    handler: EventHandler,
    active: AtomicBool,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: HashMap<String, Vec<Arc<SubscriberEntry>>>,
}

#[derive(Default)]
struct BusShared {
    state: RwLock<BusState>,
}

impl BusShared {
    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = state.subscribers.get_mut(event_type) else {
            return false;
        };
        let Some(position) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = entries.remove(position);
        entry.active.store(false, Ordering::Release);
        if entries.is_empty() {
            state.subscribers.remove(event_type);
        }
        true
    }
}

/// Live registration of one handler for one event type.
///
/// Not `Clone`: only the owner can revoke it. Dropping it revokes it too.
pub struct Subscription {
    bus: Weak<BusShared>,
    event_type: String,
    id: u64,
    revoked: bool,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_active(&self) -> bool {
        !self.revoked && self.bus.strong_count() > 0
    }

    /// Revokes the registration. Returns whether this call removed it.
    pub fn unsubscribe(&mut self) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        match self.bus.upgrade() {
            Some(shared) => shared.remove(&self.event_type, self.id),
            None => false,
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .field("revoked", &self.revoked)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Synchronous publish/subscribe channel, shareable across threads.
#[derive(Default)]
pub struct EventBus {
    shared: Arc<BusShared>,
    store: Option<Arc<dyn EventStore>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus whose `publish_and_persist` appends to `store`.
    pub fn with_store(store: Arc<dyn EventStore>) -> Self {
        Self {
            shared: Arc::default(),
            store: Some(store),
        }
    }

    pub fn subscribe(&self, event_type: impl Into<String>, handler: EventHandler) -> Subscription {
        let event_type = event_type.into();
        let mut state = self
            .shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        state
            .subscribers
            .entry(event_type.clone())
            .or_default()
            .push(Arc::new(SubscriberEntry {
                id,
                handler,
                active: AtomicBool::new(true),
            }));
        debug!("event=subscribe module=event_bus status=ok event_type={event_type} subscription_id={id}");

        Subscription {
            bus: Arc::downgrade(&self.shared),
            event_type,
            id,
            revoked: false,
        }
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Publishes a host occurrence to all current subscribers of `event_type`.
    pub fn publish(&self, event_type: impl Into<String>, payload: Value) -> DispatchSummary {
        self.dispatch(&Event::new(event_type, payload))
    }

    /// Publishes a pre-built event (e.g. one carrying a source identity).
    pub fn publish_event(&self, event: Event) -> DispatchSummary {
        self.dispatch(&event)
    }

    /// Publishes and, when `persist` is set, appends a durable copy first.
    ///
    /// Returns the stored record, or `None` when persistence was not
    /// requested, no store is configured, or the append failed. Dispatch
    /// happens in every case.
    pub fn publish_and_persist(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        persist: bool,
    ) -> Option<StoredEvent> {
        self.publish_event_and_persist(Event::new(event_type, payload), persist)
    }

    pub fn publish_event_and_persist(&self, mut event: Event, persist: bool) -> Option<StoredEvent> {
        let stored = if persist { self.persist(&event) } else { None };
        event.persisted = stored.is_some();
        self.dispatch(&event);
        stored
    }

    fn persist(&self, event: &Event) -> Option<StoredEvent> {
        let Some(store) = self.store.as_ref() else {
            debug!(
                "event=event_persist module=event_bus status=skipped reason=no_store event_type={}",
                event.event_type
            );
            return None;
        };
        match store.append(event) {
            Ok(stored) => Some(stored),
            Err(err) => {
                warn!(
                    "event=event_persist module=event_bus status=error event_type={} error={err}",
                    event.event_type
                );
                None
            }
        }
    }

    fn dispatch(&self, event: &Event) -> DispatchSummary {
        let entries: Vec<Arc<SubscriberEntry>> = self
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let mut summary = DispatchSummary::default();
        for entry in entries {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (entry.handler)(event))) {
                Ok(Ok(())) => summary.delivered += 1,
                Ok(Err(err)) => {
                    summary.faulted += 1;
                    warn!(
                        "event=handler_fault module=event_bus status=error event_type={} subscription_id={} error={err}",
                        event.event_type, entry.id
                    );
                }
                Err(_) => {
                    summary.faulted += 1;
                    error!(
                        "event=handler_fault module=event_bus status=panic event_type={} subscription_id={}",
                        event.event_type, entry.id
                    );
                }
            }
        }
        summary
    }
}

/// Publishing handle bound to one extension identity.
///
/// Unqualified types are namespaced as `plugin.<lowercase name>.<type>`.
#[derive(Clone)]
pub struct EventEmitter {
    bus: Arc<EventBus>,
    source: EventSource,
}

impl EventEmitter {
    pub fn new(bus: Arc<EventBus>, source: EventSource) -> Self {
        Self { bus, source }
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn build(&self, event_type: &str, payload: Value) -> Event {
        Event::new(qualify_event_type(&self.source.name, event_type), payload)
            .with_source(self.source.clone())
    }

    pub fn emit(&self, event_type: &str, payload: Value) -> DispatchSummary {
        self.bus.publish_event(self.build(event_type, payload))
    }

    pub fn emit_and_persist(
        &self,
        event_type: &str,
        payload: Value,
        persist: bool,
    ) -> Option<StoredEvent> {
        self.bus
            .publish_event_and_persist(self.build(event_type, payload), persist)
    }
}

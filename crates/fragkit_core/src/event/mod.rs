//! Publish/subscribe channel for domain occurrences.
//!
//! # Responsibility
//! - Route published events to subscribers of the same type.
//! - Optionally persist published events through an `EventStore`.
//! - Give extensions a namespacing publishing handle.
//!
//! # Invariants
//! - Same-type subscribers are invoked in subscription order.
//! - A failing subscriber never prevents delivery to the others.
//! - Persistence failures degrade to log entries.

pub mod bus;
pub mod envelope;

pub use bus::{DispatchSummary, EventBus, EventEmitter, EventHandler, HandlerError, Subscription};
pub use envelope::{qualify_event_type, Event, EventSource, StoredEvent};

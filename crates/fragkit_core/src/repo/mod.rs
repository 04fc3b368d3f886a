//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the persistence boundaries consumed by controllers and the bus.
//! - Isolate SQLite query details from progression logic.
//!
//! # Invariants
//! - At most one progress record per player id (upsert semantics).
//! - Counter increments are a single store-level statement.
//! - Repository APIs return semantic errors in addition to DB transport errors.

pub mod event_store;
pub mod progress_repo;

//! Domain model for player progression.
//!
//! # Responsibility
//! - Define the rank ladder and its evaluation rule.
//! - Define the persisted per-player progress record.
//!
//! # Invariants
//! - A stored `rank_index` is derived from `kills` through the active ladder.
//! - One record per player id.

pub mod progress;
pub mod rank;

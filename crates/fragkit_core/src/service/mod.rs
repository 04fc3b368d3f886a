//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into progression use cases.
//! - Keep extensions and commands decoupled from storage details.

pub mod rank_service;

pub use rank_service::{RankService, RankStanding, RANK_RESET_EVENT, RANK_UPDATED_EVENT};

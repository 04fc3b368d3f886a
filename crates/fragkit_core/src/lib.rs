//! Core runtime for fragkit game-server admin extensions.
//! This crate owns the extension lifecycle, event routing, command
//! permissions, and rank progression invariants.

pub mod bootstrap;
pub mod clock;
pub mod command;
pub mod db;
pub mod event;
pub mod extension;
pub mod locator;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod plugins;
pub mod repo;
pub mod service;

pub use bootstrap::CoreServices;
pub use command::{
    run_command, Actor, Command, CommandContext, CommandError, CommandOutcome, CommandSpec,
};
pub use event::{DispatchSummary, Event, EventBus, EventEmitter, HandlerError, Subscription};
pub use extension::{
    ExtensionBase, ExtensionConfig, ExtensionHooks, ExtensionHost, ExtensionManifest,
    ExtensionState, ManagedExtension,
};
pub use locator::{ServiceError, ServiceLocator};
pub use logging::{default_log_level, init_logging, logging_status, LogSink};
pub use model::progress::{PlayerProgressRecord, ProgressField};
pub use model::rank::{RankDefinition, RankLadder};
pub use plugins::ranks::{rank_extension, RankExtension};
pub use repo::progress_repo::{
    ProgressRepository, RepoError, RepoResult, SqliteProgressRepository,
};
pub use service::rank_service::{RankService, RankStanding};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Permission-gated textual commands contributed by extensions.
//!
//! # Responsibility
//! - Normalize host actor data into one `Actor` value at the dispatch boundary.
//! - Evaluate command permissions against actor capabilities and a static
//!   role table.
//! - Convert every command failure into a user-visible outcome.
//!
//! # Invariants
//! - Permission evaluation fails closed when no permission data exists.
//! - `run_command` never returns an error and never unwinds.

pub mod actor;
pub mod base;
pub mod permission;

pub use actor::{Actor, PermissionCheck};
pub use base::{
    error_message, run_command, Command, CommandContext, CommandError, CommandOutcome,
    CommandSpec,
};
pub use permission::{has_permission, is_admin, role_permissions, WILDCARD_PERMISSION};

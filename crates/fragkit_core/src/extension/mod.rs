//! Extension runtime: identity, lifecycle, and host registry.
//!
//! # Responsibility
//! - Validate extension identity before registration.
//! - Drive each extension through a strict lifecycle state machine.
//! - Own extension sub-components, subscriptions, routes, and commands.
//! - Route host commands to enabled extensions.
//!
//! # Invariants
//! - Lifecycle methods never fail outward; they return `bool` and log.
//! - An extension never holds two live subscriptions for one handler.
//! - `Shutdown` is terminal and `Failed` requires `reset`.

pub mod api;
pub mod host;
pub mod lifecycle;
pub mod manifest;
pub mod registry;

pub use api::{ApiSurface, HttpMethod, Route, RouteError, RouteHandler, RouteTable};
pub use host::{ExtensionHost, HostError};
pub use lifecycle::{
    ExtensionBase, ExtensionConfig, ExtensionError, ExtensionHooks, ExtensionResult,
    ExtensionState, HandlerBinding, ManagedExtension, SetupContext,
};
pub use manifest::{ExtensionManifest, ManifestValidationError};
pub use registry::ComponentRegistry;

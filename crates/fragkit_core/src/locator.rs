//! Named shared-service registry.
//!
//! # Responsibility
//! - Hold host-provided collaborators (bus, logger, messaging, API surface).
//! - Resolve them by name and type for extensions.
//!
//! # Invariants
//! - Absence is reported as `ServiceError::NotFound`; callers decide whether
//!   that disables a feature or fails their own setup.
//! - The locator must be populated before extensions are constructed; this is
//!   the host's responsibility.

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{PoisonError, RwLock};

/// `Arc<dyn LogSink>`: shared logging service.
pub const SERVICE_LOGGER: &str = "logger";
/// `Arc<EventBus>`: required by every extension.
pub const SERVICE_EVENT_BUS: &str = "event_bus";
/// `Arc<dyn MessageSink>`: outward player chat.
pub const SERVICE_MESSAGING: &str = "messaging";
/// `Arc<dyn ApiSurface>`: outward route registration.
pub const SERVICE_API: &str = "api";
/// `Arc<dyn ProgressRepository>`: progress storage for the ranks extension.
pub const SERVICE_PROGRESS_REPOSITORY: &str = "progress_repository";

/// Service lookup failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    NotFound(String),
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "service not found: {name}"),
            Self::TypeMismatch { name, expected } => {
                write!(f, "service `{name}` is not a `{expected}`")
            }
        }
    }
}

impl Error for ServiceError {}

/// Thread-safe name → instance map.
///
/// Instances are stored as cloneable values (typically `Arc<T>` or
/// `Arc<dyn Trait>`) and cloned out on lookup.
#[derive(Default)]
pub struct ServiceLocator {
    services: RwLock<BTreeMap<String, Box<dyn Any + Send + Sync>>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instance` under `name`, replacing any previous entry.
    pub fn register<T>(&self, name: impl Into<String>, instance: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Box::new(instance));
    }

    pub fn get<T>(&self, name: &str) -> Result<T, ServiceError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let entry = services
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        entry
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ServiceError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Like `get`, but treats absence or a type mismatch as `None`.
    pub fn try_get<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get(name).ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

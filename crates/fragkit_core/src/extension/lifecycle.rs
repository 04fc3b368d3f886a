//! Extension lifecycle state machine.
//!
//! `ExtensionBase` owns the generic part of every extension: configuration
//! merge, sub-component registries, subscriptions, routes, commands, and the
//! state transitions. Extension-specific behavior plugs in through
//! `ExtensionHooks`.

use crate::command::Command;
use crate::event::bus::{EventBus, EventEmitter, EventHandler, Subscription};
use crate::extension::api::{ApiSurface, Route, RouteError};
use crate::extension::manifest::ExtensionManifest;
use crate::extension::registry::ComponentRegistry;
use crate::locator::{ServiceError, ServiceLocator, SERVICE_API, SERVICE_EVENT_BUS, SERVICE_LOGGER};
use crate::logging::{LogSink, StderrLogSink};
use crate::model::rank::LadderError;
use crate::repo::progress_repo::RepoError;
use log::Level;
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Extension configuration object. Overrides replace defaults key by key.
pub type ExtensionConfig = Map<String, Value>;

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Uninitialized,
    Initializing,
    Enabled,
    Disabled,
    Failed,
    Shutdown,
}

impl ExtensionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl Display for ExtensionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Setup failures raised by hooks.
#[derive(Debug)]
pub enum ExtensionError {
    /// A required collaborator is missing or unusable.
    Configuration(String),
    InvalidConfig { key: String, message: String },
    Repo(RepoError),
    Ladder(LadderError),
    Route(RouteError),
    Resource(String),
    Panicked(&'static str),
}

pub type ExtensionResult<T> = Result<T, ExtensionError>;

impl ExtensionError {
    pub fn invalid_config(key: impl Into<String>, message: impl Display) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "configuration error: {message}"),
            Self::InvalidConfig { key, message } => {
                write!(f, "invalid config value for `{key}`: {message}")
            }
            Self::Repo(err) => write!(f, "{err}"),
            Self::Ladder(err) => write!(f, "{err}"),
            Self::Route(err) => write!(f, "{err}"),
            Self::Resource(message) => write!(f, "resource error: {message}"),
            Self::Panicked(phase) => write!(f, "panic during {phase}"),
        }
    }
}

impl Error for ExtensionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Ladder(err) => Some(err),
            Self::Route(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ServiceError> for ExtensionError {
    fn from(value: ServiceError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<RepoError> for ExtensionError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<LadderError> for ExtensionError {
    fn from(value: LadderError) -> Self {
        Self::Ladder(value)
    }
}

impl From<RouteError> for ExtensionError {
    fn from(value: RouteError) -> Self {
        Self::Route(value)
    }
}

/// One entry of the event-type → handler table.
#[derive(Clone)]
pub struct HandlerBinding {
    pub event_type: String,
    pub handler: EventHandler,
}

impl HandlerBinding {
    pub fn new(event_type: impl Into<String>, handler: EventHandler) -> Self {
        Self {
            event_type: event_type.into(),
            handler,
        }
    }
}

/// Everything hooks can see while the extension is being wired.
pub struct SetupContext<'a> {
    pub config: &'a ExtensionConfig,
    pub locator: &'a ServiceLocator,
    pub emitter: &'a EventEmitter,
    pub logger: &'a Arc<dyn LogSink>,
    pub models: &'a mut ComponentRegistry,
    pub repositories: &'a mut ComponentRegistry,
    pub controllers: &'a mut ComponentRegistry,
}

/// Extension-specific behavior. Every hook has a no-op default.
///
/// Build hooks run in declaration order during `init`. The handler table,
/// routes, and commands are collected once per successful `init`.
pub trait ExtensionHooks: Send + 'static {
    fn default_config(&self) -> ExtensionConfig {
        ExtensionConfig::new()
    }

    fn build_models(&mut self, _ctx: &mut SetupContext<'_>) -> ExtensionResult<()> {
        Ok(())
    }

    fn build_repositories(&mut self, _ctx: &mut SetupContext<'_>) -> ExtensionResult<()> {
        Ok(())
    }

    fn build_controllers(&mut self, _ctx: &mut SetupContext<'_>) -> ExtensionResult<()> {
        Ok(())
    }

    fn event_handlers(&self, _ctx: &SetupContext<'_>) -> ExtensionResult<Vec<HandlerBinding>> {
        Ok(Vec::new())
    }

    fn routes(&self, _ctx: &SetupContext<'_>) -> Vec<Route> {
        Vec::new()
    }

    fn commands(&self, _ctx: &SetupContext<'_>) -> Vec<Arc<dyn Command>> {
        Vec::new()
    }

    /// Starts owned resources such as timers. Runs on `init` and every `enable`.
    fn start_resources(&mut self, _ctx: &SetupContext<'_>) -> ExtensionResult<()> {
        Ok(())
    }

    /// Stops owned resources. Must tolerate being called when nothing runs.
    fn cleanup_resources(&mut self) {}
}

/// Generic lifecycle driver around one `ExtensionHooks` implementation.
pub struct ExtensionBase<H: ExtensionHooks> {
    manifest: ExtensionManifest,
    hooks: H,
    state: ExtensionState,
    locator: Arc<ServiceLocator>,
    overrides: ExtensionConfig,
    config: ExtensionConfig,
    models: ComponentRegistry,
    repositories: ComponentRegistry,
    controllers: ComponentRegistry,
    handler_table: Vec<HandlerBinding>,
    subscriptions: Vec<Subscription>,
    commands: Vec<Arc<dyn Command>>,
    emitter: Option<EventEmitter>,
    api: Option<Arc<dyn ApiSurface>>,
    logger: Arc<dyn LogSink>,
}

impl<H: ExtensionHooks> ExtensionBase<H> {
    pub fn new(manifest: ExtensionManifest, hooks: H, locator: Arc<ServiceLocator>) -> Self {
        Self::with_overrides(manifest, hooks, locator, ExtensionConfig::new())
    }

    /// Builds an extension whose configuration `overrides` win over defaults.
    ///
    /// The logger is resolved here: a child of the `logger` service
    /// (`Arc<dyn LogSink>`) when registered, otherwise a stderr sink.
    pub fn with_overrides(
        manifest: ExtensionManifest,
        hooks: H,
        locator: Arc<ServiceLocator>,
        overrides: ExtensionConfig,
    ) -> Self {
        let logger = resolve_logger(&locator, &manifest.name);
        Self {
            manifest,
            hooks,
            state: ExtensionState::Uninitialized,
            locator,
            overrides,
            config: ExtensionConfig::new(),
            models: ComponentRegistry::new(),
            repositories: ComponentRegistry::new(),
            controllers: ComponentRegistry::new(),
            handler_table: Vec::new(),
            subscriptions: Vec::new(),
            commands: Vec::new(),
            emitter: None,
            api: None,
            logger,
        }
    }

    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }

    /// Effective configuration after the last `init`.
    pub fn config(&self) -> &ExtensionConfig {
        &self.config
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn models(&self) -> &ComponentRegistry {
        &self.models
    }

    pub fn repositories(&self) -> &ComponentRegistry {
        &self.repositories
    }

    pub fn controllers(&self) -> &ComponentRegistry {
        &self.controllers
    }

    pub fn commands(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    pub fn emitter(&self) -> Option<&EventEmitter> {
        self.emitter.as_ref()
    }

    /// Number of live bus subscriptions owned by this extension.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|subscription| subscription.is_active())
            .count()
    }

    /// Writes one log line through the resolved sink. Never panics.
    pub fn log(&self, level: Level, message: &str, metadata: &[(&str, String)]) {
        let logger = &self.logger;
        if catch_unwind(AssertUnwindSafe(|| logger.log(level, message, metadata))).is_err() {
            let _ = catch_unwind(AssertUnwindSafe(|| {
                StderrLogSink::default().log(level, message, metadata)
            }));
        }
    }

    /// Wires the extension and enables it.
    ///
    /// Returns `true` when already initialized. Any failing or panicking step
    /// leaves the extension `Failed` with no live subscriptions.
    pub fn init(&mut self) -> bool {
        match self.state {
            ExtensionState::Enabled | ExtensionState::Disabled => {
                self.trace(Level::Debug, "extension_init", "skipped", "already_initialized");
                return true;
            }
            ExtensionState::Failed => {
                self.trace(Level::Warn, "extension_init", "rejected", "reset_required");
                return false;
            }
            ExtensionState::Shutdown => {
                self.trace(Level::Warn, "extension_init", "rejected", "shut_down");
                return false;
            }
            ExtensionState::Initializing => {
                self.trace(Level::Warn, "extension_init", "rejected", "in_progress");
                return false;
            }
            ExtensionState::Uninitialized => {}
        }

        self.state = ExtensionState::Initializing;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.setup()))
            .unwrap_or_else(|_| Err(ExtensionError::Panicked("init")));
        match outcome {
            Ok(()) => {
                self.state = ExtensionState::Enabled;
                self.trace(Level::Info, "extension_init", "ok", "enabled");
                self.notify("plugin.initialized");
                true
            }
            Err(err) => {
                self.abort_setup();
                self.state = ExtensionState::Failed;
                self.log(
                    Level::Error,
                    "event=extension_init module=extension status=error",
                    &[
                        ("extension", self.manifest.name.clone()),
                        ("error", err.to_string()),
                    ],
                );
                false
            }
        }
    }

    /// Re-enables a disabled extension, initializing first when needed.
    pub fn enable(&mut self) -> bool {
        match self.state {
            ExtensionState::Uninitialized => return self.init(),
            ExtensionState::Enabled => {
                self.trace(Level::Debug, "extension_enable", "skipped", "already_enabled");
                return true;
            }
            ExtensionState::Failed | ExtensionState::Shutdown | ExtensionState::Initializing => {
                self.trace(Level::Warn, "extension_enable", "rejected", self.state.as_str());
                return false;
            }
            ExtensionState::Disabled => {}
        }

        let Some(emitter) = self.emitter.clone() else {
            self.trace(Level::Error, "extension_enable", "error", "missing_emitter");
            return false;
        };
        self.subscribe_handlers(emitter.bus());
        let started = catch_unwind(AssertUnwindSafe(|| {
            self.with_context(&emitter, |hooks, ctx| hooks.start_resources(ctx))
        }))
        .unwrap_or_else(|_| Err(ExtensionError::Panicked("enable")));
        if let Err(err) = started {
            self.revoke_subscriptions();
            self.run_cleanup();
            self.log(
                Level::Error,
                "event=extension_enable module=extension status=error",
                &[
                    ("extension", self.manifest.name.clone()),
                    ("error", err.to_string()),
                ],
            );
            return false;
        }

        self.state = ExtensionState::Enabled;
        self.trace(Level::Info, "extension_enable", "ok", "enabled");
        self.notify("plugin.enabled");
        true
    }

    /// Revokes subscriptions and stops owned resources.
    pub fn disable(&mut self) -> bool {
        match self.state {
            ExtensionState::Enabled => {}
            ExtensionState::Disabled => {
                self.trace(Level::Debug, "extension_disable", "skipped", "already_disabled");
                return true;
            }
            _ => {
                self.trace(Level::Debug, "extension_disable", "rejected", self.state.as_str());
                return false;
            }
        }

        let revoked = self.revoke_subscriptions();
        self.run_cleanup();
        self.state = ExtensionState::Disabled;
        self.log(
            Level::Info,
            "event=extension_disable module=extension status=ok",
            &[
                ("extension", self.manifest.name.clone()),
                ("revoked", revoked.to_string()),
            ],
        );
        self.notify("plugin.disabled");
        true
    }

    /// Tears the extension down for good.
    pub fn shutdown(&mut self) -> bool {
        match self.state {
            ExtensionState::Shutdown => {
                self.trace(Level::Debug, "extension_shutdown", "skipped", "already_shut_down");
                return true;
            }
            ExtensionState::Enabled => {
                self.disable();
            }
            ExtensionState::Failed => {
                self.revoke_subscriptions();
                self.run_cleanup();
            }
            _ => {
                self.revoke_subscriptions();
            }
        }

        if let Some(api) = &self.api {
            api.unregister_routes(&self.manifest.name);
        }
        self.close_repositories();
        self.clear_components();

        self.state = ExtensionState::Shutdown;
        self.trace(Level::Info, "extension_shutdown", "ok", "terminal");
        self.notify("plugin.shutdown");
        self.emitter = None;
        self.api = None;
        true
    }

    /// Returns a failed extension to `Uninitialized` so `init` may retry.
    pub fn reset(&mut self) -> bool {
        match self.state {
            ExtensionState::Uninitialized => true,
            ExtensionState::Failed => {
                self.revoke_subscriptions();
                self.clear_components();
                self.config.clear();
                self.emitter = None;
                self.api = None;
                self.state = ExtensionState::Uninitialized;
                self.trace(Level::Info, "extension_reset", "ok", "uninitialized");
                true
            }
            _ => {
                self.trace(Level::Debug, "extension_reset", "rejected", self.state.as_str());
                false
            }
        }
    }

    fn setup(&mut self) -> ExtensionResult<()> {
        let mut config = self.hooks.default_config();
        for (key, value) in &self.overrides {
            config.insert(key.clone(), value.clone());
        }
        self.config = config;

        let bus: Arc<EventBus> = self.locator.get(SERVICE_EVENT_BUS)?;
        let emitter = EventEmitter::new(bus, self.manifest.source());
        self.emitter = Some(emitter.clone());
        self.api = self.locator.try_get::<Arc<dyn ApiSurface>>(SERVICE_API);

        self.with_context(&emitter, |hooks, ctx| {
            hooks.build_models(ctx)?;
            hooks.build_repositories(ctx)?;
            hooks.build_controllers(ctx)
        })?;

        let (table, routes, commands) = self.with_context(&emitter, |hooks, ctx| {
            let table = hooks.event_handlers(ctx)?;
            Ok::<_, ExtensionError>((table, hooks.routes(ctx), hooks.commands(ctx)))
        })?;
        self.handler_table = table;
        self.subscribe_handlers(emitter.bus());
        self.register_routes(routes)?;
        self.commands = commands;

        self.with_context(&emitter, |hooks, ctx| hooks.start_resources(ctx))
    }

    fn with_context<R>(
        &mut self,
        emitter: &EventEmitter,
        f: impl FnOnce(&mut H, &mut SetupContext<'_>) -> R,
    ) -> R {
        let mut ctx = SetupContext {
            config: &self.config,
            locator: &self.locator,
            emitter,
            logger: &self.logger,
            models: &mut self.models,
            repositories: &mut self.repositories,
            controllers: &mut self.controllers,
        };
        f(&mut self.hooks, &mut ctx)
    }

    fn register_routes(&mut self, routes: Vec<Route>) -> ExtensionResult<()> {
        let Some(api) = self.api.clone() else {
            if !routes.is_empty() {
                self.trace(Level::Debug, "route_register", "skipped", "no_api_surface");
            }
            return Ok(());
        };
        for route in routes {
            api.register_route(&self.manifest.name, route)?;
        }
        Ok(())
    }

    fn subscribe_handlers(&mut self, bus: &EventBus) {
        self.revoke_subscriptions();
        self.subscriptions = self
            .handler_table
            .iter()
            .map(|binding| bus.subscribe(binding.event_type.clone(), Arc::clone(&binding.handler)))
            .collect();
    }

    fn revoke_subscriptions(&mut self) -> usize {
        let revoked = self
            .subscriptions
            .iter_mut()
            .map(Subscription::unsubscribe)
            .filter(|was_active| *was_active)
            .count();
        self.subscriptions.clear();
        revoked
    }

    fn run_cleanup(&mut self) {
        let hooks = &mut self.hooks;
        if catch_unwind(AssertUnwindSafe(|| hooks.cleanup_resources())).is_err() {
            self.trace(Level::Warn, "resource_cleanup", "error", "panicked");
        }
    }

    fn abort_setup(&mut self) {
        self.revoke_subscriptions();
        self.run_cleanup();
        if let Some(api) = &self.api {
            api.unregister_routes(&self.manifest.name);
        }
        self.commands.clear();
        self.close_repositories();
    }

    fn close_repositories(&mut self) {
        for (name, err) in self.repositories.close_all() {
            self.log(
                Level::Warn,
                "event=repository_close module=extension status=error",
                &[
                    ("extension", self.manifest.name.clone()),
                    ("repository", name),
                    ("error", err),
                ],
            );
        }
    }

    fn clear_components(&mut self) {
        self.models.clear();
        self.repositories.clear();
        self.controllers.clear();
        self.handler_table.clear();
        self.commands.clear();
    }

    fn notify(&self, event_type: &str) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        emitter.emit(
            event_type,
            json!({
                "name": self.manifest.name,
                "version": self.manifest.version,
                "description": self.manifest.description,
                "author": self.manifest.author,
                "state": self.state.as_str(),
            }),
        );
    }

    fn trace(&self, level: Level, event: &str, status: &str, detail: &str) {
        self.log(
            level,
            &format!("event={event} module=extension status={status}"),
            &[
                ("extension", self.manifest.name.clone()),
                ("detail", detail.to_string()),
            ],
        );
    }
}

fn resolve_logger(locator: &ServiceLocator, scope: &str) -> Arc<dyn LogSink> {
    match locator.try_get::<Arc<dyn LogSink>>(SERVICE_LOGGER) {
        Some(shared) => shared.child(scope).unwrap_or(shared),
        None => StderrLogSink::default()
            .child(scope)
            .unwrap_or_else(|| Arc::new(StderrLogSink::default())),
    }
}

/// Object-safe view used by `ExtensionHost` to drive heterogeneous extensions.
pub trait ManagedExtension: Send {
    fn manifest(&self) -> &ExtensionManifest;
    fn state(&self) -> ExtensionState;
    fn init(&mut self) -> bool;
    fn enable(&mut self) -> bool;
    fn disable(&mut self) -> bool;
    fn shutdown(&mut self) -> bool;
    fn reset(&mut self) -> bool;
    fn commands(&self) -> &[Arc<dyn Command>];
}

impl<H: ExtensionHooks> ManagedExtension for ExtensionBase<H> {
    fn manifest(&self) -> &ExtensionManifest {
        ExtensionBase::manifest(self)
    }

    fn state(&self) -> ExtensionState {
        ExtensionBase::state(self)
    }

    fn init(&mut self) -> bool {
        ExtensionBase::init(self)
    }

    fn enable(&mut self) -> bool {
        ExtensionBase::enable(self)
    }

    fn disable(&mut self) -> bool {
        ExtensionBase::disable(self)
    }

    fn shutdown(&mut self) -> bool {
        ExtensionBase::shutdown(self)
    }

    fn reset(&mut self) -> bool {
        ExtensionBase::reset(self)
    }

    fn commands(&self) -> &[Arc<dyn Command>] {
        ExtensionBase::commands(self)
    }
}

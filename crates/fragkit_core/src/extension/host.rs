//! Host-side registry driving every loaded extension.

use crate::command::{run_command, CommandContext, CommandError, CommandOutcome, CommandSpec};
use crate::extension::lifecycle::{ExtensionState, ManagedExtension};
use crate::extension::manifest::ManifestValidationError;
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Ordered collection of extensions plus command routing.
///
/// Extensions are initialized in registration order and shut down in
/// reverse order.
#[derive(Default)]
pub struct ExtensionHost {
    extensions: Vec<Box<dyn ManagedExtension>>,
    index: BTreeMap<String, usize>,
}

impl ExtensionHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one extension after manifest validation.
    ///
    /// Names are unique case-insensitively, matching event namespacing.
    pub fn register(&mut self, extension: Box<dyn ManagedExtension>) -> Result<(), HostError> {
        let manifest = extension.manifest();
        manifest.validate().map_err(HostError::InvalidManifest)?;
        let key = manifest.name.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(HostError::DuplicateExtension(manifest.name.clone()));
        }
        self.index.insert(key, self.extensions.len());
        self.extensions.push(extension);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&dyn ManagedExtension> {
        let position = *self.index.get(&name.to_lowercase())?;
        self.extensions.get(position).map(|extension| extension.as_ref())
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Box<dyn ManagedExtension>, HostError> {
        let position = self
            .index
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        self.extensions
            .get_mut(position)
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    /// Initializes every extension; one failure does not stop the rest.
    ///
    /// Returns how many extensions ended up enabled.
    pub fn init_all(&mut self) -> usize {
        let mut enabled = 0;
        for extension in &mut self.extensions {
            if extension.init() {
                enabled += 1;
            } else {
                warn!(
                    "event=host_init module=host status=error extension={} state={}",
                    extension.manifest().name,
                    extension.state()
                );
            }
        }
        info!(
            "event=host_init module=host status=ok enabled={enabled} total={}",
            self.extensions.len()
        );
        enabled
    }

    pub fn enable(&mut self, name: &str) -> Result<bool, HostError> {
        Ok(self.get_mut(name)?.enable())
    }

    pub fn disable(&mut self, name: &str) -> Result<bool, HostError> {
        Ok(self.get_mut(name)?.disable())
    }

    pub fn reset(&mut self, name: &str) -> Result<bool, HostError> {
        Ok(self.get_mut(name)?.reset())
    }

    /// Shuts every extension down in reverse registration order.
    pub fn shutdown_all(&mut self) {
        for extension in self.extensions.iter_mut().rev() {
            extension.shutdown();
        }
        info!(
            "event=host_shutdown module=host status=ok total={}",
            self.extensions.len()
        );
    }

    /// Routes one parsed command to the first enabled extension that owns it.
    pub fn dispatch_command(
        &self,
        name: &str,
        args: &[String],
        ctx: &CommandContext,
    ) -> CommandOutcome {
        let command = self
            .extensions
            .iter()
            .filter(|extension| extension.state() == ExtensionState::Enabled)
            .flat_map(|extension| extension.commands().iter())
            .find(|command| command.matches(name));
        match command {
            Some(command) => run_command(command.as_ref(), args, ctx),
            None => {
                info!("event=command_dispatch module=host status=not_found command={name}");
                CommandOutcome::failure(CommandError::NotFound(format!("!{name}")).to_string())
            }
        }
    }

    /// Commands of enabled extensions the actor is allowed to run.
    pub fn available_commands(&self, ctx: &CommandContext) -> Vec<&CommandSpec> {
        self.extensions
            .iter()
            .filter(|extension| extension.state() == ExtensionState::Enabled)
            .flat_map(|extension| extension.commands().iter())
            .filter(|command| command.check_permission(&ctx.actor))
            .map(|command| command.spec())
            .collect()
    }
}

/// Host registration and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    InvalidManifest(ManifestValidationError),
    DuplicateExtension(String),
    NotFound(String),
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::DuplicateExtension(name) => {
                write!(f, "extension already registered: {name}")
            }
            Self::NotFound(name) => write!(f, "extension not found: {name}"),
        }
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            _ => None,
        }
    }
}

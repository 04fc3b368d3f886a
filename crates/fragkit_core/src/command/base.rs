//! Command abstraction and dispatch wrapper.

use crate::command::actor::Actor;
use crate::command::permission::has_permission;
use crate::repo::progress_repo::RepoError;
use log::{info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Static metadata of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub usage: String,
    /// `None` means everyone may run the command.
    pub permission: Option<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            usage: format!("!{name}"),
            name,
            aliases: Vec::new(),
            description: String::new(),
            permission: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    /// Case-insensitive match against the name or any alias.
    pub fn matches(&self, input: &str) -> bool {
        let input = input.trim();
        self.name.eq_ignore_ascii_case(input)
            || self
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(input))
    }
}

/// Invocation context normalized by the host.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub actor: Actor,
    /// Server the command was typed on, when issued from game chat.
    pub server_id: Option<String>,
}

impl CommandContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            server_id: None,
        }
    }

    pub fn on_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }
}

/// User-visible command result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failure with the message wrapped by `error_message`.
    pub fn failure(message: impl AsRef<str>) -> Self {
        Self {
            success: false,
            message: error_message(message.as_ref()),
        }
    }
}

/// Marks a message as an error for chat rendering.
pub fn error_message(message: &str) -> String {
    format!("^1Error: ^7{message}")
}

/// Failures raised inside command execution.
#[derive(Debug)]
pub enum CommandError {
    PermissionDenied { command: String },
    NotFound(String),
    NotImplemented(String),
    InvalidArguments { usage: String },
    Repo(RepoError),
    Failed(String),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied { command } => {
                write!(f, "you do not have permission to use !{command}")
            }
            Self::NotFound(target) => write!(f, "not found: {target}"),
            Self::NotImplemented(command) => write!(f, "command `{command}` is not implemented"),
            Self::InvalidArguments { usage } => write!(f, "usage: {usage}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CommandError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// A textual command contributed by an extension.
pub trait Command: Send + Sync {
    fn spec(&self) -> &CommandSpec;

    fn matches(&self, input: &str) -> bool {
        self.spec().matches(input)
    }

    fn check_permission(&self, actor: &Actor) -> bool {
        has_permission(actor, self.spec().permission.as_deref())
    }

    fn execute(&self, _args: &[String], _ctx: &CommandContext) -> Result<CommandOutcome, CommandError> {
        Err(CommandError::NotImplemented(self.spec().name.clone()))
    }
}

/// Checks permission, executes, and converts every failure into an outcome.
///
/// Storage failures are logged with detail but shown to the user generically.
pub fn run_command(command: &dyn Command, args: &[String], ctx: &CommandContext) -> CommandOutcome {
    let name = command.spec().name.as_str();
    if !command.check_permission(&ctx.actor) {
        info!(
            "event=command_denied module=command status=denied command={name} actor={}",
            ctx.actor.display_name()
        );
        return CommandOutcome::failure(
            CommandError::PermissionDenied {
                command: name.to_string(),
            }
            .to_string(),
        );
    }

    match catch_unwind(AssertUnwindSafe(|| command.execute(args, ctx))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(CommandError::Repo(err))) => {
            warn!("event=command_run module=command status=error command={name} error={err}");
            CommandOutcome::failure("storage is unavailable, try again later")
        }
        Ok(Err(err)) => {
            info!("event=command_run module=command status=rejected command={name} error={err}");
            CommandOutcome::failure(err.to_string())
        }
        Err(_) => {
            warn!("event=command_run module=command status=panic command={name}");
            CommandOutcome::failure("command failed unexpectedly")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        run_command, Command, CommandContext, CommandError, CommandOutcome, CommandSpec,
    };
    use crate::command::actor::Actor;
    use crate::repo::progress_repo::RepoError;

    struct Abstract {
        spec: CommandSpec,
    }

    impl Command for Abstract {
        fn spec(&self) -> &CommandSpec {
            &self.spec
        }
    }

    struct Scripted {
        spec: CommandSpec,
        behavior: fn() -> Result<CommandOutcome, CommandError>,
    }

    impl Command for Scripted {
        fn spec(&self) -> &CommandSpec {
            &self.spec
        }

        fn execute(&self, _args: &[String], _ctx: &CommandContext) -> Result<CommandOutcome, CommandError> {
            (self.behavior)()
        }
    }

    fn scripted(
        permission: Option<&str>,
        behavior: fn() -> Result<CommandOutcome, CommandError>,
    ) -> Scripted {
        let mut spec = CommandSpec::new("kick").alias("k").usage("!kick <player>");
        spec.permission = permission.map(str::to_string);
        Scripted { spec, behavior }
    }

    #[test]
    fn matches_name_and_aliases_case_insensitively() {
        let spec = CommandSpec::new("rank").alias("level").alias("Progress");
        assert!(spec.matches("RANK"));
        assert!(spec.matches("progress"));
        assert!(spec.matches(" Level "));
        assert!(!spec.matches("ranks"));
    }

    #[test]
    fn base_execute_is_not_implemented() {
        let command = Abstract {
            spec: CommandSpec::new("noop"),
        };
        let err = command
            .execute(&[], &CommandContext::default())
            .unwrap_err();
        assert!(matches!(err, CommandError::NotImplemented(name) if name == "noop"));

        let outcome = run_command(&command, &[], &CommandContext::default());
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("^1"));
    }

    #[test]
    fn denied_permission_becomes_user_message() {
        let command = scripted(Some("kick"), || Ok(CommandOutcome::success("kicked")));
        let outcome = run_command(&command, &[], &CommandContext::new(Actor::new("p1", "Nobody")));
        assert!(!outcome.success);
        assert!(outcome.message.contains("permission"));

        let moderator = Actor::new("p2", "Mod").with_role("moderator");
        let outcome = run_command(&command, &[], &CommandContext::new(moderator));
        assert_eq!(outcome, CommandOutcome::success("kicked"));
    }

    #[test]
    fn errors_and_panics_become_failures() {
        let ctx = CommandContext::default();

        let usage = scripted(None, || {
            Err(CommandError::InvalidArguments {
                usage: "!kick <player>".to_string(),
            })
        });
        let outcome = run_command(&usage, &[], &ctx);
        assert!(!outcome.success);
        assert!(outcome.message.contains("!kick <player>"));

        let storage = scripted(None, || Err(RepoError::Closed.into()));
        let outcome = run_command(&storage, &[], &ctx);
        assert!(!outcome.success);
        assert!(!outcome.message.contains("closed"));

        let panicking = scripted(None, || panic!("bad command"));
        let outcome = run_command(&panicking, &[], &ctx);
        assert!(!outcome.success);
    }
}

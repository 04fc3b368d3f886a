//! Chat commands of the Ranks extension.

use crate::command::{Command, CommandContext, CommandError, CommandOutcome, CommandSpec};
use crate::service::rank_service::{RankService, RankStanding};
use std::sync::Arc;

/// Permission required by `!recomputeranks`.
pub const MANAGE_RANKS_PERMISSION: &str = "manage_ranks";

/// `!rank [player_id]`: shows rank progress for the caller or a player.
///
/// Only the caller's own record is created on first sight; other ids are
/// looked up read-only.
pub struct RankCommand {
    spec: CommandSpec,
    service: Arc<RankService>,
}

impl RankCommand {
    pub fn new(service: Arc<RankService>) -> Self {
        Self {
            spec: CommandSpec::new("rank")
                .alias("level")
                .alias("progress")
                .description("Show rank progress")
                .usage("!rank [player_id]"),
            service,
        }
    }
}

impl Command for RankCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, args: &[String], ctx: &CommandContext) -> Result<CommandOutcome, CommandError> {
        let caller = ctx
            .actor
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let (record, label) = match (first_arg(args), caller) {
            (Some(player_id), Some(caller)) if player_id == caller => {
                (self.service.get_progress(caller)?, ctx.actor.display_name())
            }
            (Some(player_id), _) => match self.service.find_progress(player_id)? {
                Some(record) => (record, player_id),
                None => return Err(CommandError::NotFound(format!("no progress for {player_id}"))),
            },
            (None, Some(caller)) => (self.service.get_progress(caller)?, ctx.actor.display_name()),
            (None, None) => {
                return Err(CommandError::InvalidArguments {
                    usage: self.spec.usage.clone(),
                })
            }
        };
        Ok(CommandOutcome::success(describe(
            label,
            &self.service.standing(&record),
        )))
    }
}

/// `!resetrank <player_id>`: deletes a player's progress.
pub struct ResetRankCommand {
    spec: CommandSpec,
    service: Arc<RankService>,
}

impl ResetRankCommand {
    pub fn new(service: Arc<RankService>) -> Self {
        Self {
            spec: CommandSpec::new("resetrank")
                .description("Reset a player's rank progress")
                .usage("!resetrank <player_id>")
                .permission("admin"),
            service,
        }
    }
}

impl Command for ResetRankCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, args: &[String], _ctx: &CommandContext) -> Result<CommandOutcome, CommandError> {
        let Some(player_id) = first_arg(args) else {
            return Err(CommandError::InvalidArguments {
                usage: self.spec.usage.clone(),
            });
        };
        if !self.service.reset_progress(player_id)? {
            return Err(CommandError::NotFound(format!("no progress for {player_id}")));
        }
        Ok(CommandOutcome::success(format!(
            "^7Progress for {player_id} has been reset"
        )))
    }
}

/// `!recomputeranks`: re-derives every stored rank now.
pub struct RecomputeRanksCommand {
    spec: CommandSpec,
    service: Arc<RankService>,
}

impl RecomputeRanksCommand {
    pub fn new(service: Arc<RankService>) -> Self {
        Self {
            spec: CommandSpec::new("recomputeranks")
                .alias("reconcile")
                .description("Re-derive all stored ranks from kills")
                .permission(MANAGE_RANKS_PERMISSION),
            service,
        }
    }
}

impl Command for RecomputeRanksCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn execute(&self, _args: &[String], _ctx: &CommandContext) -> Result<CommandOutcome, CommandError> {
        let corrected = self.service.recompute_all()?;
        Ok(CommandOutcome::success(format!(
            "^7Ranks recomputed, {corrected} corrected"
        )))
    }
}

fn first_arg(args: &[String]) -> Option<&str> {
    args.first()
        .map(|arg| arg.trim())
        .filter(|arg| !arg.is_empty())
}

fn describe(label: &str, standing: &RankStanding) -> String {
    let next = match (&standing.next_rank, standing.kills_to_next) {
        (Some(next), Some(remaining)) => format!("{remaining} kills to {next}"),
        _ => "top rank reached".to_string(),
    };
    format!(
        "^7{label}: {} ^7| kills {} | deaths {} | {next}",
        standing.colored_rank, standing.kills, standing.deaths
    )
}

//! Ranks extension: kill-based progression ladder.
//!
//! # Responsibility
//! - Credit kills and deaths from host game events.
//! - Announce promotions and expose rank commands plus a leaderboard route.
//! - Periodically reconcile stored ranks with the configured ladder.
//!
//! # Invariants
//! - The reconcile timer only runs while the extension is enabled.
//! - A progress store opened by the extension is closed on shutdown; a shared
//!   store from the service locator is left open.

pub mod commands;
pub mod config;
pub mod handlers;
pub mod reconcile;

use crate::command::Command;
use crate::extension::api::Route;
use crate::extension::lifecycle::{
    ExtensionBase, ExtensionConfig, ExtensionError, ExtensionHooks, ExtensionResult,
    HandlerBinding, SetupContext,
};
use crate::extension::manifest::ExtensionManifest;
use crate::locator::{ServiceLocator, SERVICE_MESSAGING, SERVICE_PROGRESS_REPOSITORY};
use crate::messaging::MessageSink;
use crate::model::rank::RankLadder;
use crate::repo::progress_repo::{ProgressRepository, SqliteProgressRepository};
use crate::service::rank_service::RankService;
use commands::{RankCommand, RecomputeRanksCommand, ResetRankCommand};
use config::RanksConfig;
use handlers::{connect_handler, kill_handler, Announcer, PLAYER_CONNECT_EVENT, PLAYER_KILL_EVENT};
use log::Level;
use reconcile::ReconcileTimer;
use serde_json::{json, Value};
use std::sync::Arc;

pub const RANKS_EXTENSION_NAME: &str = "Ranks";
pub const LEADERBOARD_ROUTE: &str = "/ranks/leaderboard";

/// Registry key of the `Arc<RankLadder>` model.
pub const LADDER_MODEL: &str = "ladder";
/// Registry key of the `Arc<dyn ProgressRepository>` repository.
pub const PROGRESS_REPOSITORY: &str = "progress";
/// Registry key of the `Arc<RankService>` controller.
pub const RANK_SERVICE_CONTROLLER: &str = "rank_service";

pub type RankExtension = ExtensionBase<RankHooks>;

pub fn manifest() -> ExtensionManifest {
    ExtensionManifest::new(RANKS_EXTENSION_NAME, env!("CARGO_PKG_VERSION"))
        .description("Kill-based rank progression")
        .author("fragkit")
}

/// Builds the Ranks extension; `overrides` win over `RanksConfig` defaults.
pub fn rank_extension(locator: Arc<ServiceLocator>, overrides: ExtensionConfig) -> RankExtension {
    ExtensionBase::with_overrides(manifest(), RankHooks::default(), locator, overrides)
}

/// Ranks-specific lifecycle hooks.
#[derive(Default)]
pub struct RankHooks {
    settings: RanksConfig,
    timer: Option<ReconcileTimer>,
}

impl RankHooks {
    pub fn settings(&self) -> &RanksConfig {
        &self.settings
    }

    pub fn timer_running(&self) -> bool {
        self.timer.as_ref().is_some_and(ReconcileTimer::is_running)
    }
}

impl ExtensionHooks for RankHooks {
    fn default_config(&self) -> ExtensionConfig {
        RanksConfig::defaults_map()
    }

    fn build_models(&mut self, ctx: &mut SetupContext<'_>) -> ExtensionResult<()> {
        self.settings = RanksConfig::from_config(ctx.config)?;
        let ladder = self.settings.ladder()?;
        ctx.logger.log(
            Level::Debug,
            "event=ladder_load module=ranks status=ok",
            &[("ranks", ladder.len().to_string())],
        );
        ctx.models.insert(LADDER_MODEL, Arc::new(ladder));
        Ok(())
    }

    fn build_repositories(&mut self, ctx: &mut SetupContext<'_>) -> ExtensionResult<()> {
        if let Some(shared) = ctx
            .locator
            .try_get::<Arc<dyn ProgressRepository>>(SERVICE_PROGRESS_REPOSITORY)
        {
            ctx.repositories.insert(PROGRESS_REPOSITORY, shared);
            return Ok(());
        }

        let owned = match &self.settings.database_path {
            Some(path) => SqliteProgressRepository::open(path)?,
            None => SqliteProgressRepository::in_memory()?,
        };
        let owned: Arc<dyn ProgressRepository> = Arc::new(owned);
        ctx.repositories
            .insert_closable(PROGRESS_REPOSITORY, owned, |repo| {
                repo.close().map_err(|err| err.to_string())
            });
        Ok(())
    }

    fn build_controllers(&mut self, ctx: &mut SetupContext<'_>) -> ExtensionResult<()> {
        let ladder: Arc<RankLadder> = ctx
            .models
            .get(LADDER_MODEL)
            .ok_or_else(|| ExtensionError::Configuration("rank ladder missing".to_string()))?;
        let repo: Arc<dyn ProgressRepository> = ctx
            .repositories
            .get(PROGRESS_REPOSITORY)
            .ok_or_else(|| ExtensionError::Configuration("progress store missing".to_string()))?;
        let service = RankService::new(RankLadder::clone(&ladder), repo)
            .with_emitter(ctx.emitter.clone(), self.settings.persist_events);
        ctx.controllers
            .insert(RANK_SERVICE_CONTROLLER, Arc::new(service));
        Ok(())
    }

    fn event_handlers(&self, ctx: &SetupContext<'_>) -> ExtensionResult<Vec<HandlerBinding>> {
        let service = rank_service(ctx)?;
        let announcer = Announcer::new(
            ctx.locator
                .try_get::<Arc<dyn MessageSink>>(SERVICE_MESSAGING),
            self.settings.announce_promotions,
            self.settings.greet_on_connect,
        );
        Ok(vec![
            HandlerBinding::new(
                PLAYER_KILL_EVENT,
                kill_handler(Arc::clone(&service), announcer.clone()),
            ),
            HandlerBinding::new(PLAYER_CONNECT_EVENT, connect_handler(service, announcer)),
        ])
    }

    fn routes(&self, ctx: &SetupContext<'_>) -> Vec<Route> {
        let Ok(service) = rank_service(ctx) else {
            return Vec::new();
        };
        let default_limit = self.settings.leaderboard_size;
        vec![Route::get(
            LEADERBOARD_ROUTE,
            Arc::new(move |request: &Value| -> Result<Value, String> {
                let limit = request
                    .get("limit")
                    .and_then(Value::as_u64)
                    .and_then(|limit| u32::try_from(limit).ok())
                    .unwrap_or(default_limit);
                let entries = service.leaderboard(limit).map_err(|err| err.to_string())?;
                Ok(json!({ "entries": entries }))
            }),
        )]
    }

    fn commands(&self, ctx: &SetupContext<'_>) -> Vec<Arc<dyn Command>> {
        let Ok(service) = rank_service(ctx) else {
            return Vec::new();
        };
        vec![
            Arc::new(RankCommand::new(Arc::clone(&service))),
            Arc::new(ResetRankCommand::new(Arc::clone(&service))),
            Arc::new(RecomputeRanksCommand::new(service)),
        ]
    }

    fn start_resources(&mut self, ctx: &SetupContext<'_>) -> ExtensionResult<()> {
        let Some(interval) = self.settings.reconcile_interval() else {
            return Ok(());
        };
        if self.timer_running() {
            return Ok(());
        }
        let service = rank_service(ctx)?;
        let timer = ReconcileTimer::start(service, interval)
            .map_err(|err| ExtensionError::Resource(format!("reconcile timer: {err}")))?;
        self.timer = Some(timer);
        Ok(())
    }

    fn cleanup_resources(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
    }
}

fn rank_service(ctx: &SetupContext<'_>) -> ExtensionResult<Arc<RankService>> {
    ctx.controllers
        .get(RANK_SERVICE_CONTROLLER)
        .ok_or_else(|| ExtensionError::Configuration("rank service missing".to_string()))
}

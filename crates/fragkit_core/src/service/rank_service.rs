//! Rank progression use-case service.
//!
//! # Responsibility
//! - Keep every stored `rank_index` consistent with `kills` and the ladder.
//! - Report promotions through a single `rank_changed` signal.
//! - Emit `rankUpdated` / `rankReset` notifications for every mutation.
//!
//! # Invariants
//! - Mutations for one player id run behind that player's lock, so an
//!   increment and its rank recomputation are observed as one step.
//! - Notifications are emitted after the player lock is released.
//! - Persistence failures propagate as `RepoError`.

use crate::clock::now_epoch_ms;
use crate::event::bus::EventEmitter;
use crate::model::progress::{PlayerProgressRecord, ProgressField, ProgressValidationError};
use crate::model::rank::RankLadder;
use crate::repo::progress_repo::{
    ProgressListQuery, ProgressOrder, ProgressRepository, RepoResult,
};
use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Emitted after every counter mutation or rank correction.
pub const RANK_UPDATED_EVENT: &str = "rankUpdated";
/// Emitted after a record is deleted by an explicit reset.
pub const RANK_RESET_EVENT: &str = "rankReset";

const RECOMPUTE_PAGE_SIZE: u32 = 200;
const MAX_LEADERBOARD_LIMIT: u32 = 100;

/// Read model combining a record with its ladder position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankStanding {
    pub player_id: String,
    pub rank_index: usize,
    pub rank: String,
    pub colored_rank: String,
    pub kills: i64,
    pub deaths: i64,
    pub next_rank: Option<String>,
    pub kills_to_next: Option<i64>,
}

/// Why a rank notification was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateReason {
    Kill,
    Death,
    Correction,
    Reconcile,
}

impl UpdateReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Kill => "kill",
            Self::Death => "death",
            Self::Correction => "correction",
            Self::Reconcile => "reconcile",
        }
    }
}

/// Ladder-driven progression over a shared progress repository.
pub struct RankService {
    ladder: RankLadder,
    repo: Arc<dyn ProgressRepository>,
    emitter: Option<EventEmitter>,
    persist_events: bool,
    player_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RankService {
    pub fn new(ladder: RankLadder, repo: Arc<dyn ProgressRepository>) -> Self {
        Self {
            ladder,
            repo,
            emitter: None,
            persist_events: false,
            player_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches the publishing handle used for rank notifications.
    pub fn with_emitter(mut self, emitter: EventEmitter, persist_events: bool) -> Self {
        self.emitter = Some(emitter);
        self.persist_events = persist_events;
        self
    }

    pub fn ladder(&self) -> &RankLadder {
        &self.ladder
    }

    /// Loads a record, creating a zero-state one on first sight.
    ///
    /// A stored rank that no longer matches the ladder is corrected and
    /// persisted before returning.
    pub fn get_progress(&self, player_id: &str) -> RepoResult<PlayerProgressRecord> {
        ensure_player_id(player_id)?;
        let (record, corrected) = self.with_player_lock(player_id, || -> RepoResult<_> {
            match self.repo.get_record(player_id)? {
                Some(mut record) => {
                    let corrected = self.heal(&mut record)?;
                    Ok((record, corrected))
                }
                None => {
                    let mut record = PlayerProgressRecord::new(player_id);
                    self.apply_ladder(&mut record);
                    self.repo.upsert_record(&record)?;
                    debug!("event=progress_create module=service status=ok");
                    Ok((record, false))
                }
            }
        })?;
        if corrected {
            self.notify_updated(&record, UpdateReason::Correction, true);
        }
        Ok(record)
    }

    /// Loads an existing record without creating one. A stale rank is still
    /// corrected and persisted.
    pub fn find_progress(&self, player_id: &str) -> RepoResult<Option<PlayerProgressRecord>> {
        ensure_player_id(player_id)?;
        let found = self.with_player_lock(player_id, || -> RepoResult<_> {
            let Some(mut record) = self.repo.get_record(player_id)? else {
                return Ok(None);
            };
            let corrected = self.heal(&mut record)?;
            Ok(Some((record, corrected)))
        })?;
        Ok(found.map(|(record, corrected)| {
            if corrected {
                self.notify_updated(&record, UpdateReason::Correction, true);
            }
            record
        }))
    }

    /// Adds `amount` kills and returns whether the rank changed.
    pub fn increment_counter(&self, player_id: &str, amount: i64) -> RepoResult<bool> {
        let (record, changed) = self.mutate(player_id, ProgressField::Kills, amount)?;
        if changed {
            info!(
                "event=rank_change module=service status=ok rank_index={}",
                record.rank_index
            );
        }
        self.notify_updated(&record, UpdateReason::Kill, changed);
        Ok(changed)
    }

    /// Adds one death. Deaths never move the rank.
    pub fn record_death(&self, player_id: &str) -> RepoResult<PlayerProgressRecord> {
        let (record, changed) = self.mutate(player_id, ProgressField::Deaths, 1)?;
        self.notify_updated(&record, UpdateReason::Death, changed);
        Ok(record)
    }

    /// Re-derives every stored rank, returning the number of corrected records.
    pub fn recompute_all(&self) -> RepoResult<usize> {
        let mut corrected = 0;
        let mut offset = 0;
        loop {
            let page = self.repo.list_records(&ProgressListQuery {
                limit: Some(RECOMPUTE_PAGE_SIZE),
                offset,
                order: ProgressOrder::PlayerId,
            })?;
            for listed in &page {
                if let Some(record) = self.reconcile_one(&listed.player_id)? {
                    corrected += 1;
                    self.notify_updated(&record, UpdateReason::Reconcile, true);
                }
            }
            if page.len() < RECOMPUTE_PAGE_SIZE as usize {
                break;
            }
            offset += RECOMPUTE_PAGE_SIZE;
        }
        info!("event=rank_recompute module=service status=ok corrected={corrected}");
        Ok(corrected)
    }

    /// Deletes the player's record. Returns whether one existed.
    pub fn reset_progress(&self, player_id: &str) -> RepoResult<bool> {
        ensure_player_id(player_id)?;
        let existed = self.with_player_lock(player_id, || self.repo.delete_record(player_id))?;
        info!("event=rank_reset module=service status=ok existed={existed}");
        self.notify(
            RANK_RESET_EVENT,
            json!({
                "player_id": player_id,
                "existed": existed,
                "timestamp": now_epoch_ms(),
            }),
        );
        Ok(existed)
    }

    /// Top players by kills. `limit` is clamped to `1..=100`.
    pub fn leaderboard(&self, limit: u32) -> RepoResult<Vec<RankStanding>> {
        let records = self.repo.list_records(&ProgressListQuery {
            limit: Some(limit.clamp(1, MAX_LEADERBOARD_LIMIT)),
            offset: 0,
            order: ProgressOrder::KillsDesc,
        })?;
        Ok(records.iter().map(|record| self.standing(record)).collect())
    }

    pub fn standing(&self, record: &PlayerProgressRecord) -> RankStanding {
        let rank = self.ladder.rank(record.rank_index);
        let next = self.ladder.next_rank(record.rank_index);
        RankStanding {
            player_id: record.player_id.clone(),
            rank_index: record.rank_index,
            rank: rank.name.clone(),
            colored_rank: rank.colored_name(),
            kills: record.kills,
            deaths: record.deaths,
            next_rank: next.map(|rank| rank.name.clone()),
            kills_to_next: next.map(|rank| (rank.threshold - record.kills).max(0)),
        }
    }

    fn mutate(
        &self,
        player_id: &str,
        field: ProgressField,
        amount: i64,
    ) -> RepoResult<(PlayerProgressRecord, bool)> {
        ensure_player_id(player_id)?;
        self.with_player_lock(player_id, || -> RepoResult<_> {
            let mut record = self.repo.increment_field(player_id, field, amount)?;
            let changed = self.apply_ladder(&mut record);
            self.repo.upsert_record(&record)?;
            Ok((record, changed))
        })
    }

    fn reconcile_one(&self, player_id: &str) -> RepoResult<Option<PlayerProgressRecord>> {
        self.with_player_lock(player_id, || -> RepoResult<_> {
            let Some(mut record) = self.repo.get_record(player_id)? else {
                return Ok(None);
            };
            Ok(self.heal(&mut record)?.then_some(record))
        })
    }

    // Corrects a stored record in place, persisting only when the rank moved.
    fn heal(&self, record: &mut PlayerProgressRecord) -> RepoResult<bool> {
        let corrected = self.apply_ladder(record);
        if corrected {
            self.repo.upsert_record(record)?;
        }
        Ok(corrected)
    }

    // Sets the derived rank and stamps timestamps. Returns whether it moved.
    fn apply_ladder(&self, record: &mut PlayerProgressRecord) -> bool {
        let now = now_epoch_ms();
        let qualifying = self.ladder.qualifying_index(record.kills);
        let changed = qualifying != record.rank_index;
        record.rank_index = qualifying;
        record.last_updated = now;
        if changed {
            record.rank_achieved_at = Some(now);
        }
        changed
    }

    // Runs `f` while holding the player's lock. The map entry is dropped once
    // no other caller holds or waits on it.
    fn with_player_lock<R>(&self, player_id: &str, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self
                .player_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(player_id.to_string()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self
            .player_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus `lock` means nobody else is queued.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(player_id);
        }
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.player_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify_updated(&self, record: &PlayerProgressRecord, reason: UpdateReason, changed: bool) {
        let rank = self.ladder.rank(record.rank_index);
        self.notify(
            RANK_UPDATED_EVENT,
            json!({
                "player_id": record.player_id,
                "rank_index": record.rank_index,
                "rank": rank.name,
                "kills": record.kills,
                "deaths": record.deaths,
                "rank_changed": changed,
                "reason": reason.as_str(),
                "timestamp": record.last_updated,
            }),
        );
    }

    fn notify(&self, event_type: &str, payload: serde_json::Value) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        if self.persist_events {
            emitter.emit_and_persist(event_type, payload, true);
        } else {
            emitter.emit(event_type, payload);
        }
    }
}

fn ensure_player_id(player_id: &str) -> RepoResult<()> {
    if player_id.trim().is_empty() {
        return Err(ProgressValidationError::BlankPlayerId.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{RankService, RANK_RESET_EVENT, RANK_UPDATED_EVENT};
    use crate::event::bus::{EventBus, EventEmitter};
    use crate::event::envelope::{Event, EventSource};
    use crate::model::progress::PlayerProgressRecord;
    use crate::model::rank::{RankDefinition, RankLadder};
    use crate::repo::progress_repo::{
        ProgressRepository, RepoError, SqliteProgressRepository,
    };
    use std::sync::{Arc, Mutex};

    fn scenario_ladder() -> RankLadder {
        RankLadder::new(vec![
            RankDefinition::new("Recruit", 0, "^7"),
            RankDefinition::new("Private", 50, "^2"),
            RankDefinition::new("Sergeant", 500, "^4"),
        ])
        .unwrap()
    }

    fn service(ladder: RankLadder) -> (RankService, Arc<SqliteProgressRepository>) {
        let repo = Arc::new(SqliteProgressRepository::in_memory().unwrap());
        let service = RankService::new(ladder, Arc::clone(&repo) as Arc<dyn ProgressRepository>);
        (service, repo)
    }

    #[test]
    fn get_progress_creates_zero_state_record() {
        let (service, repo) = service(scenario_ladder());
        let record = service.get_progress("p1").unwrap();

        assert_eq!(record.kills, 0);
        assert_eq!(record.rank_index, 0);
        assert!(repo.get_record("p1").unwrap().is_some());
    }

    #[test]
    fn get_progress_heals_stale_rank() {
        let (service, repo) = service(scenario_ladder());
        let mut stale = PlayerProgressRecord::new("p1");
        stale.kills = 600;
        stale.rank_index = 0;
        repo.upsert_record(&stale).unwrap();

        let record = service.get_progress("p1").unwrap();
        assert_eq!(record.rank_index, 2);
        assert!(record.rank_achieved_at.is_some());
        assert_eq!(repo.get_record("p1").unwrap().unwrap().rank_index, 2);
    }

    #[test]
    fn increment_reports_rank_change_only_on_crossing() {
        let (service, repo) = service(scenario_ladder());
        assert!(service.increment_counter("p1", 50).unwrap());
        assert!(service.increment_counter("p1", 450).unwrap());
        assert!(!service.increment_counter("p1", 1).unwrap());

        let stored = repo.get_record("p1").unwrap().unwrap();
        assert_eq!(stored.kills, 501);
        assert_eq!(stored.rank_index, 2);
    }

    #[test]
    fn deaths_do_not_move_rank() {
        let (service, _repo) = service(scenario_ladder());
        service.increment_counter("p1", 60).unwrap();
        let record = service.record_death("p1").unwrap();

        assert_eq!(record.deaths, 1);
        assert_eq!(record.rank_index, 1);
    }

    #[test]
    fn rejects_blank_ids_and_non_positive_amounts() {
        let (service, _repo) = service(scenario_ladder());
        assert!(matches!(
            service.get_progress("  ").unwrap_err(),
            RepoError::Validation(_)
        ));
        assert!(matches!(
            service.increment_counter("p1", 0).unwrap_err(),
            RepoError::Validation(_)
        ));
    }

    #[test]
    fn recompute_all_corrects_only_mismatches() {
        let (service, repo) = service(scenario_ladder());
        for (id, kills, rank_index) in [("a", 10, 0), ("b", 70, 0), ("c", 900, 1), ("d", 55, 1)] {
            let mut record = PlayerProgressRecord::new(id);
            record.kills = kills;
            record.rank_index = rank_index;
            repo.upsert_record(&record).unwrap();
        }

        assert_eq!(service.recompute_all().unwrap(), 2);
        assert_eq!(repo.get_record("b").unwrap().unwrap().rank_index, 1);
        assert_eq!(repo.get_record("c").unwrap().unwrap().rank_index, 2);
        assert_eq!(service.recompute_all().unwrap(), 0);
    }

    #[test]
    fn reset_and_leaderboard() {
        let (service, _repo) = service(scenario_ladder());
        service.increment_counter("low", 5).unwrap();
        service.increment_counter("high", 520).unwrap();
        service.increment_counter("mid", 60).unwrap();

        let board = service.leaderboard(2).unwrap();
        let ids: Vec<&str> = board.iter().map(|entry| entry.player_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
        assert_eq!(board[0].rank, "Sergeant");
        assert_eq!(board[0].next_rank, None);
        assert_eq!(board[1].kills_to_next, Some(440));

        assert!(service.reset_progress("high").unwrap());
        assert!(!service.reset_progress("high").unwrap());
        assert_eq!(service.leaderboard(10).unwrap().len(), 2);
    }

    #[test]
    fn player_locks_are_released_after_each_mutation() {
        let (service, _repo) = service(scenario_ladder());
        for index in 0..500 {
            let player_id = format!("p{index}");
            service.increment_counter(&player_id, 1).unwrap();
            service.get_progress(&player_id).unwrap();
            service.reset_progress(&player_id).unwrap();
        }
        service.find_progress("ghost").unwrap();
        service.recompute_all().unwrap();

        assert_eq!(service.tracked_locks(), 0);
    }

    #[test]
    fn player_locks_drain_after_concurrent_increments() {
        let (service, repo) = service(scenario_ladder());
        let service = Arc::new(service);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        service.increment_counter("shared", 1).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(repo.get_record("shared").unwrap().unwrap().kills, 200);
        assert_eq!(service.tracked_locks(), 0);
    }

    #[test]
    fn find_progress_never_creates_records() {
        let (service, repo) = service(scenario_ladder());
        assert!(service.find_progress("nobody").unwrap().is_none());
        assert!(repo.get_record("nobody").unwrap().is_none());

        let mut stale = PlayerProgressRecord::new("p1");
        stale.kills = 70;
        repo.upsert_record(&stale).unwrap();
        let found = service.find_progress("p1").unwrap().unwrap();
        assert_eq!(found.rank_index, 1);
        assert_eq!(repo.get_record("p1").unwrap().unwrap().rank_index, 1);
    }

    #[test]
    fn emits_namespaced_notifications() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subscriptions = Vec::new();
        for event_type in ["plugin.ranks.rankUpdated", "plugin.ranks.rankReset"] {
            let seen = Arc::clone(&seen);
            subscriptions.push(bus.subscribe(
                event_type,
                Arc::new(move |event: &Event| {
                    seen.lock().unwrap().push(event.clone());
                    Ok(())
                }),
            ));
        }
        let emitter = EventEmitter::new(
            Arc::clone(&bus),
            EventSource {
                name: "Ranks".to_string(),
                version: "1.0.0".to_string(),
            },
        );
        let (service, _repo) = service(scenario_ladder());
        let service = service.with_emitter(emitter, false);

        service.increment_counter("p1", 50).unwrap();
        service.reset_progress("p1").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].event_type.ends_with(RANK_UPDATED_EVENT));
        assert_eq!(seen[0].payload["player_id"], "p1");
        assert_eq!(seen[0].payload["rank_changed"], true);
        assert!(seen[0].payload["timestamp"].is_i64());
        assert!(seen[1].event_type.ends_with(RANK_RESET_EVENT));
        assert_eq!(seen[1].payload["existed"], true);
    }
}

//! Game event handlers of the Ranks extension.

use crate::event::bus::{EventHandler, HandlerError};
use crate::event::envelope::Event;
use crate::messaging::MessageSink;
use crate::service::rank_service::RankService;
use log::{debug, warn};
use std::sync::Arc;

/// Host event carrying `killer_id`, `victim_id`, `killer_name`, `server_id`.
pub const PLAYER_KILL_EVENT: &str = "player.kill";
/// Host event carrying `player_id`, `name`, `server_id`.
pub const PLAYER_CONNECT_EVENT: &str = "player.connect";

/// Chat side effects shared by the handlers.
#[derive(Clone)]
pub struct Announcer {
    sink: Option<Arc<dyn MessageSink>>,
    announce_promotions: bool,
    greet_on_connect: bool,
}

impl Announcer {
    pub fn new(
        sink: Option<Arc<dyn MessageSink>>,
        announce_promotions: bool,
        greet_on_connect: bool,
    ) -> Self {
        Self {
            sink,
            announce_promotions,
            greet_on_connect,
        }
    }

    fn send(&self, server_id: Option<&str>, line: &str) {
        let (Some(sink), Some(server_id)) = (&self.sink, server_id) else {
            debug!("event=chat_send module=ranks status=skipped reason=no_target");
            return;
        };
        if let Err(err) = sink.send_chat(server_id, line) {
            warn!("event=chat_send module=ranks status=error error={err}");
        }
    }
}

/// Credits the killer and records the victim's death.
///
/// Suicides and kills without a killer only record the death.
pub fn kill_handler(service: Arc<RankService>, announcer: Announcer) -> EventHandler {
    Arc::new(move |event: &Event| -> Result<(), HandlerError> {
        let killer = event.payload_str("killer_id");
        let victim = event.payload_str("victim_id");
        if killer.is_none() && victim.is_none() {
            debug!("event=player_kill module=ranks status=skipped reason=missing_ids");
            return Ok(());
        }

        if let Some(killer) = killer.filter(|killer| Some(*killer) != victim) {
            let promoted = service.increment_counter(killer, 1)?;
            if promoted && announcer.announce_promotions {
                let record = service.get_progress(killer)?;
                let rank = service.ladder().rank(record.rank_index);
                let name = event.payload_str("killer_name").unwrap_or(killer);
                announcer.send(
                    event.payload_str("server_id"),
                    &format!("^7{name} ^7has been promoted to {}!", rank.colored_name()),
                );
            }
        }
        if let Some(victim) = victim {
            service.record_death(victim)?;
        }
        Ok(())
    })
}

/// Loads (and heals) the connecting player's progress.
pub fn connect_handler(service: Arc<RankService>, announcer: Announcer) -> EventHandler {
    Arc::new(move |event: &Event| -> Result<(), HandlerError> {
        let Some(player_id) = event.payload_str("player_id") else {
            debug!("event=player_connect module=ranks status=skipped reason=missing_id");
            return Ok(());
        };
        let record = service.get_progress(player_id)?;
        if announcer.greet_on_connect {
            let standing = service.standing(&record);
            let name = event.payload_str("name").unwrap_or(player_id);
            announcer.send(
                event.payload_str("server_id"),
                &format!(
                    "^7Welcome {name}^7, rank {} ^7({} kills)",
                    standing.colored_rank, standing.kills
                ),
            );
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::{connect_handler, kill_handler, Announcer, PLAYER_CONNECT_EVENT, PLAYER_KILL_EVENT};
    use crate::event::bus::{EventBus, Subscription};
    use crate::messaging::{MemoryMessageSink, MessageSink};
    use crate::model::rank::{RankDefinition, RankLadder};
    use crate::repo::progress_repo::{ProgressRepository, SqliteProgressRepository};
    use crate::service::rank_service::RankService;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        bus: EventBus,
        repo: Arc<SqliteProgressRepository>,
        chat: Arc<MemoryMessageSink>,
        _subscriptions: Vec<Subscription>,
    }

    fn fixture(greet: bool) -> Fixture {
        let repo = Arc::new(SqliteProgressRepository::in_memory().unwrap());
        let ladder = RankLadder::new(vec![
            RankDefinition::new("Recruit", 0, "^7"),
            RankDefinition::new("Private", 2, "^2"),
        ])
        .unwrap();
        let service = Arc::new(RankService::new(
            ladder,
            Arc::clone(&repo) as Arc<dyn ProgressRepository>,
        ));
        let chat = Arc::new(MemoryMessageSink::new());
        let announcer = Announcer::new(
            Some(Arc::clone(&chat) as Arc<dyn MessageSink>),
            true,
            greet,
        );
        let bus = EventBus::new();
        let subscriptions = vec![
            bus.subscribe(
                PLAYER_KILL_EVENT,
                kill_handler(Arc::clone(&service), announcer.clone()),
            ),
            bus.subscribe(PLAYER_CONNECT_EVENT, connect_handler(service, announcer)),
        ];
        Fixture {
            bus,
            repo,
            chat,
            _subscriptions: subscriptions,
        }
    }

    fn kill(bus: &EventBus, killer: &str, victim: &str) {
        bus.publish(
            PLAYER_KILL_EVENT,
            json!({
                "killer_id": killer,
                "victim_id": victim,
                "killer_name": "Alice",
                "server_id": "srv-1",
            }),
        );
    }

    #[test]
    fn kill_credits_killer_and_victim_and_announces_promotion() {
        let f = fixture(false);
        kill(&f.bus, "p1", "p2");
        assert!(f.chat.lines().is_empty());
        kill(&f.bus, "p1", "p3");

        let killer = f.repo.get_record("p1").unwrap().unwrap();
        assert_eq!(killer.kills, 2);
        assert_eq!(killer.rank_index, 1);
        assert_eq!(f.repo.get_record("p2").unwrap().unwrap().deaths, 1);
        assert_eq!(
            f.chat.lines(),
            vec![(
                "srv-1".to_string(),
                "^7Alice ^7has been promoted to ^2Private^7!".to_string()
            )]
        );
    }

    #[test]
    fn suicide_and_world_kills_only_record_deaths() {
        let f = fixture(false);
        kill(&f.bus, "p1", "p1");
        f.bus.publish(PLAYER_KILL_EVENT, json!({"victim_id": "p2"}));

        let suicide = f.repo.get_record("p1").unwrap().unwrap();
        assert_eq!((suicide.kills, suicide.deaths), (0, 1));
        assert_eq!(f.repo.get_record("p2").unwrap().unwrap().deaths, 1);
    }

    #[test]
    fn malformed_payloads_are_ignored() {
        let f = fixture(false);
        let summary = f.bus.publish(PLAYER_KILL_EVENT, json!({"weapon": "rail"}));
        assert_eq!(summary.faulted, 0);
        let summary = f.bus.publish(PLAYER_CONNECT_EVENT, json!({"player_id": "  "}));
        assert_eq!(summary.faulted, 0);
    }

    #[test]
    fn connect_creates_record_and_greets() {
        let f = fixture(true);
        f.bus.publish(
            PLAYER_CONNECT_EVENT,
            json!({"player_id": "p9", "name": "Bob", "server_id": "srv-2"}),
        );

        assert!(f.repo.get_record("p9").unwrap().is_some());
        assert_eq!(
            f.chat.lines(),
            vec![(
                "srv-2".to_string(),
                "^7Welcome Bob^7, rank ^7Recruit^7 ^7(0 kills)".to_string()
            )]
        );
    }

    #[test]
    fn storage_failure_is_reported_as_fault() {
        let f = fixture(false);
        f.repo.close().unwrap();
        let summary = f.bus.publish(PLAYER_CONNECT_EVENT, json!({"player_id": "p1"}));
        assert_eq!(summary.faulted, 1);
    }
}

//! Periodic background reconciliation of stored ranks.

use crate::service::rank_service::RankService;
use flume::{RecvTimeoutError, Sender};
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Worker thread running `RankService::recompute_all` every interval.
///
/// `stop` (also run on drop) signals the worker and joins it, so no
/// reconciliation write happens after it returns.
pub struct ReconcileTimer {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileTimer {
    pub fn start(service: Arc<RankService>, interval: Duration) -> io::Result<Self> {
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("fragkit-rank-reconcile".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match service.recompute_all() {
                        Ok(corrected) => {
                            debug!("event=rank_reconcile module=ranks status=ok corrected={corrected}")
                        }
                        Err(err) => {
                            warn!("event=rank_reconcile module=ranks status=error error={err}")
                        }
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        debug!(
            "event=rank_reconcile module=ranks status=started interval_ms={}",
            interval.as_millis()
        );
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stops and joins the worker. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("event=rank_reconcile module=ranks status=error reason=worker_panicked");
            } else {
                debug!("event=rank_reconcile module=ranks status=stopped");
            }
        }
    }
}

impl Drop for ReconcileTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::ReconcileTimer;
    use crate::model::progress::PlayerProgressRecord;
    use crate::model::rank::{RankDefinition, RankLadder};
    use crate::repo::progress_repo::{ProgressRepository, SqliteProgressRepository};
    use crate::service::rank_service::RankService;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn stale_record(id: &str) -> PlayerProgressRecord {
        let mut record = PlayerProgressRecord::new(id);
        record.kills = 75;
        record
    }

    #[test]
    fn corrects_ranks_until_stopped() {
        let repo = Arc::new(SqliteProgressRepository::in_memory().unwrap());
        let ladder = RankLadder::new(vec![
            RankDefinition::new("Recruit", 0, "^7"),
            RankDefinition::new("Private", 50, "^2"),
        ])
        .unwrap();
        let service = Arc::new(RankService::new(
            ladder,
            Arc::clone(&repo) as Arc<dyn ProgressRepository>,
        ));
        repo.upsert_record(&stale_record("early")).unwrap();

        let mut timer = ReconcileTimer::start(Arc::clone(&service), Duration::from_millis(10)).unwrap();
        assert!(timer.is_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while repo.get_record("early").unwrap().unwrap().rank_index != 1 {
            assert!(Instant::now() < deadline, "reconcile never ran");
            thread::sleep(Duration::from_millis(5));
        }

        timer.stop();
        timer.stop();
        assert!(!timer.is_running());

        repo.upsert_record(&stale_record("late")).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(repo.get_record("late").unwrap().unwrap().rank_index, 0);
    }
}

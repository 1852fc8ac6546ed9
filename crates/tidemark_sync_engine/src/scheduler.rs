//! Periodic sync rounds.
//!
//! A round runs one attempt for every registered pair, each on the blocking
//! pool. The scheduler itself never interrupts an attempt: stopping takes
//! effect between rounds.

use crate::engine::{SyncReport, Synchronizer};
use crate::error::{SyncError, SyncResult};
use crate::peer::SyncPeer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A synchronizer and the peer it pulls from.
#[derive(Clone)]
pub struct SyncPair {
    /// Pulling side.
    pub synchronizer: Arc<Synchronizer>,
    /// Source side.
    pub peer: Arc<dyn SyncPeer>,
}

impl SyncPair {
    /// Creates a pair.
    pub fn new(synchronizer: Arc<Synchronizer>, peer: Arc<dyn SyncPeer>) -> Self {
        Self { synchronizer, peer }
    }
}

/// Runs sync rounds over a fixed set of pairs.
pub struct SyncScheduler {
    interval: Duration,
    pairs: Vec<SyncPair>,
}

impl SyncScheduler {
    /// Creates a scheduler with no pairs.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pairs: Vec::new(),
        }
    }

    /// Adds a pair to every future round.
    pub fn add_pair(&mut self, pair: SyncPair) {
        self.pairs.push(pair);
    }

    /// Returns the number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if no pair is registered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Returns the interval between rounds.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one round and returns one result per pair, in insertion order.
    pub async fn run_round(&self) -> Vec<SyncResult<SyncReport>> {
        let tasks: Vec<_> = self
            .pairs
            .iter()
            .cloned()
            .map(|pair| {
                tokio::task::spawn_blocking(move || pair.synchronizer.sync_from(pair.peer.as_ref()))
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(match task.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Aborted(e.to_string())),
            });
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(pairs = results.len(), failed, "sync round finished with failures");
        } else {
            debug!(pairs = results.len(), "sync round finished");
        }
        results
    }

    /// Starts running rounds on the current runtime.
    ///
    /// The first round starts immediately. Rounds never overlap; a round
    /// that overruns the interval delays the next one.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut rounds = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }
                self.run_round().await;
                rounds += 1;
            }

            info!(rounds, "sync scheduler stopped");
            rounds
        });

        SchedulerHandle { stop: stop_tx, task }
    }
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("interval", &self.interval)
            .field("pairs", &self.pairs.len())
            .finish()
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Stops the scheduler after the current round and returns the number
    /// of rounds it ran.
    pub async fn stop(self) -> SyncResult<u64> {
        let _ = self.stop.send(true);
        self.task
            .await
            .map_err(|e| SyncError::Aborted(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::peer::{MockPeer, SessionPeer};
    use tidemark_core::{Config, KeyedStore, Session};

    fn session(name: &str) -> Arc<Session> {
        let config = Config::new().object_classes(["power"]);
        Arc::new(Session::open_in_memory(name, &config).unwrap())
    }

    #[tokio::test]
    async fn round_reports_each_pair() {
        let a = session("a");
        let b = session("b");
        a.register_local(None, "tcp://a", b"").unwrap();
        b.register_local(Some(a.as_ref()), "tcp://b", b"").unwrap();
        b.table("power").unwrap().put("k", vec![1]).unwrap();

        let down = MockPeer::new("down");
        down.set_connected(false);

        let mut scheduler = SyncScheduler::new(Duration::from_millis(10));
        scheduler.add_pair(SyncPair::new(
            Arc::new(Synchronizer::new(Arc::clone(&a), SyncConfig::default())),
            Arc::new(SessionPeer::new(Arc::clone(&b))),
        ));
        scheduler.add_pair(SyncPair::new(
            Arc::new(Synchronizer::new(Arc::clone(&a), SyncConfig::default())),
            Arc::new(down),
        ));

        let results = scheduler.run_round().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().total_applied(), 1);
        assert!(matches!(results[1], Err(SyncError::NotConnected)));
        assert_eq!(a.table("power").unwrap().get("k").unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn spawned_scheduler_stops() {
        let scheduler = SyncScheduler::new(Duration::from_millis(5));
        assert!(scheduler.is_empty());

        let handle = scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let rounds = handle.stop().await.unwrap();
        assert!(rounds >= 1);
    }
}

//! Anti-entropy synchronizer.

use crate::config::{FrontierSource, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::peer::SyncPeer;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidemark_core::{NodeError, Session};
use tidemark_protocol::{ClockId, OplogEntry, OplogPage, Tsn};
use tracing::{debug, info, warn};

/// The current state of a synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Working out which origins to pull.
    Planning,
    /// Pulling and applying oplog tails.
    Pulling,
    /// The last attempt completed.
    Synced,
    /// The last attempt failed.
    Error,
    /// Waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if an attempt is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Planning | SyncState::Pulling)
    }

    /// Returns true if a new attempt can start.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counters across all attempts of one synchronizer.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Attempts that completed.
    pub attempts_completed: u64,
    /// Attempts that failed.
    pub attempts_failed: u64,
    /// Entries applied.
    pub entries_applied: u64,
    /// Entries pulled that were already present.
    pub entries_skipped: u64,
    /// Retries performed by [`Synchronizer::sync_with_retry`].
    pub retries: u64,
    /// When the last attempt completed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of pulling one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginReport {
    /// Origin pulled.
    pub clock_id: ClockId,
    /// Entries applied.
    pub applied: u64,
    /// Entries that were already present.
    pub skipped: u64,
    /// Local mark for the origin after the pull.
    pub high: Tsn,
}

/// Outcome of one completed attempt.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Peer pulled from.
    pub peer: String,
    /// One report per origin of interest, ascending by clock id.
    pub origins: Vec<OriginReport>,
    /// Duration of the attempt.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns the number of entries applied across all origins.
    pub fn total_applied(&self) -> u64 {
        self.origins.iter().map(|o| o.applied).sum()
    }

    /// Returns the report for one origin.
    pub fn origin(&self, clock_id: ClockId) -> Option<&OriginReport> {
        self.origins.iter().find(|o| o.clock_id == clock_id)
    }
}

/// Pulls oplog tails from peers into one local node.
///
/// An attempt against a peer:
/// 1. plans the origins of interest and the local mark of each,
/// 2. pulls each origin's tail above that mark page by page,
/// 3. applies every entry in ascending tsn order, fetching a snapshot from
///    the peer for inserts and updates,
/// 4. advances the local mark to the last applied entry after every page,
///    and also when a page fails halfway.
///
/// Any failure ends the attempt; what was applied and marked stays. A
/// synchronizer runs one attempt at a time, so use one per peer pair when
/// pairs run concurrently.
pub struct Synchronizer {
    local: Arc<Session>,
    config: SyncConfig,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl Synchronizer {
    /// Creates a synchronizer pulling into `local`.
    pub fn new(local: Arc<Session>, config: SyncConfig) -> Self {
        Self {
            local,
            config,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the session pulled into.
    pub fn local(&self) -> &Arc<Session> {
        &self.local
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn begin(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: state.to_string(),
                to: SyncState::Planning.to_string(),
            });
        }
        *state = SyncState::Planning;
        Ok(())
    }

    /// Runs one attempt against `peer`.
    pub fn sync_from(&self, peer: &dyn SyncPeer) -> SyncResult<SyncReport> {
        let start = Instant::now();
        self.begin()?;

        match self.run(peer) {
            Ok(origins) => {
                let report = SyncReport {
                    peer: peer.name().to_string(),
                    origins,
                    duration: start.elapsed(),
                };
                self.set_state(SyncState::Synced);
                {
                    let mut stats = self.stats.write();
                    stats.attempts_completed += 1;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                info!(
                    local = %self.local.name(),
                    peer = %report.peer,
                    origins = report.origins.len(),
                    applied = report.total_applied(),
                    duration_ms = report.duration.as_millis() as u64,
                    "sync attempt completed"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_error(peer, &e);
                Err(e)
            }
        }
    }

    /// Runs attempts against `peer` until one succeeds, a non-retryable
    /// error occurs or the retry budget is spent.
    pub fn sync_with_retry(&self, peer: &dyn SyncPeer) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync_from(peer) {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    debug!(peer = %peer.name(), attempt, error = %e, "retrying sync");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run(&self, peer: &dyn SyncPeer) -> SyncResult<Vec<OriginReport>> {
        if !peer.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let plan = self.plan(peer)?;
        debug!(local = %self.local.name(), peer = %peer.name(), origins = plan.len(), "sync planned");

        self.set_state(SyncState::Pulling);
        plan.into_iter()
            .map(|(origin, since)| self.pull_origin(peer, origin, since))
            .collect()
    }

    /// Returns each origin of interest with the local mark to pull above.
    fn plan(&self, peer: &dyn SyncPeer) -> SyncResult<BTreeMap<ClockId, Tsn>> {
        let me = match self.local.my_clock_id() {
            Ok(id) => Some(id),
            Err(NodeError::Registration(_)) => None,
            Err(e) => return Err(SyncError::Local(e)),
        };
        let mut plan = BTreeMap::new();

        match self.config.frontier {
            FrontierSource::Advertised => {
                for high in peer.remote_highs()? {
                    if Some(high.clock_id) == me {
                        continue;
                    }
                    let mine = self.local_high(high.clock_id)?;
                    if high.tsn > mine {
                        plan.insert(high.clock_id, mine);
                    }
                }
            }
            FrontierSource::Local => {
                for high in self.local.remote_highs().map_err(SyncError::Local)? {
                    if Some(high.clock_id) != me {
                        plan.insert(high.clock_id, high.tsn);
                    }
                }
            }
        }

        if let Some(theirs) = peer.identity()? {
            if Some(theirs) != me && !plan.contains_key(&theirs) {
                let mine = self.local_high(theirs)?;
                plan.insert(theirs, mine);
            }
        }
        Ok(plan)
    }

    fn local_high(&self, clock_id: ClockId) -> SyncResult<Tsn> {
        self.local.check_high(clock_id).map_err(SyncError::Local)
    }

    fn pull_origin(&self, peer: &dyn SyncPeer, origin: ClockId, since: Tsn) -> SyncResult<OriginReport> {
        let mut report = OriginReport {
            clock_id: origin,
            applied: 0,
            skipped: 0,
            high: since,
        };
        let mut since = since;

        loop {
            let page = peer.oplog_tail(origin, since, self.config.pull_batch_size)?;
            validate_page(origin, since, &page)?;

            let mut last = None;
            let mut failure = None;
            let (mut applied, mut skipped) = (0u64, 0u64);
            for entry in &page.entries {
                match self.apply_entry(peer, entry) {
                    Ok(true) => applied += 1,
                    Ok(false) => skipped += 1,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
                last = Some(entry.tsn);
            }

            report.applied += applied;
            report.skipped += skipped;
            {
                let mut stats = self.stats.write();
                stats.entries_applied += applied;
                stats.entries_skipped += skipped;
            }

            if let Some(tsn) = last {
                report.high = self.local.raise_high(origin, tsn).map_err(SyncError::Local)?;
                since = tsn;
            }
            if let Some(e) = failure {
                return Err(e);
            }

            debug!(
                peer = %peer.name(),
                %origin,
                entries = page.entries.len(),
                high = %report.high,
                has_more = page.has_more,
                "page applied"
            );
            if !page.has_more || page.is_empty() {
                break;
            }
        }
        Ok(report)
    }

    fn apply_entry(&self, peer: &dyn SyncPeer, entry: &OplogEntry) -> SyncResult<bool> {
        let thing = if entry.op.carries_value() {
            let thing = peer
                .anti_entropy_get(&entry.table_name, entry.clock_id, entry.tsn)?
                .ok_or_else(|| SyncError::MissingSnapshot {
                    class: entry.table_name.clone(),
                    timestamp: entry.timestamp(),
                })?;
            Some(thing)
        } else {
            None
        };
        self.local
            .apply_remote(entry, thing.as_ref())
            .map_err(SyncError::Local)
    }

    fn handle_error(&self, peer: &dyn SyncPeer, error: &SyncError) {
        self.set_state(SyncState::Error);
        {
            let mut stats = self.stats.write();
            stats.attempts_failed += 1;
            stats.last_error = Some(error.to_string());
        }
        warn!(local = %self.local.name(), peer = %peer.name(), error = %error, "sync attempt failed");
    }
}

/// Checks that a page only extends the tail of `origin` above `since`.
fn validate_page(origin: ClockId, since: Tsn, page: &OplogPage) -> SyncResult<()> {
    let mut previous = since;
    for entry in &page.entries {
        if entry.clock_id != origin {
            return Err(SyncError::Protocol(format!(
                "asked for the tail of {origin}, got entry {}",
                entry.timestamp()
            )));
        }
        if entry.tsn <= previous {
            return Err(SyncError::OutOfOrder {
                entry: entry.timestamp(),
                after: previous,
            });
        }
        previous = entry.tsn;
    }
    Ok(())
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("local", &self.local.name())
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::peer::MockPeer;
    use tidemark_core::Config;
    use tidemark_protocol::{HighWaterMark, OpKind, Thing};

    const ORIGIN: ClockId = ClockId::new(2);

    fn local() -> Arc<Session> {
        let config = Config::new().object_classes(["power"]);
        let session = Session::open_in_memory("a", &config).unwrap();
        session.register_local(None, "tcp://a", b"").unwrap();
        Arc::new(session)
    }

    fn insert(tsn: i64) -> OplogEntry {
        OplogEntry::new("power", ORIGIN, Tsn::new(tsn), OpKind::Insert, format!("k{tsn}"))
    }

    fn thing(tsn: i64) -> Thing {
        Thing {
            key: format!("k{tsn}"),
            value: vec![tsn as u8],
            url: "tcp://b".into(),
            payload: Vec::new(),
            clock_id: ORIGIN,
            tsn: Tsn::new(tsn),
        }
    }

    fn scripted(tsns: &[i64], things: &[i64]) -> MockPeer {
        let peer = MockPeer::new("b");
        peer.set_identity(Some(ORIGIN));
        let last = tsns.iter().copied().max().unwrap_or(0);
        peer.set_highs(vec![HighWaterMark::new(ORIGIN, Tsn::new(last))]);
        peer.set_tail(ORIGIN, tsns.iter().map(|&t| insert(t)).collect());
        for &t in things {
            peer.add_thing(thing(t));
        }
        peer
    }

    #[test]
    fn state_transitions() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::Pulling.can_start_sync());
        assert!(SyncState::Planning.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn pulls_in_pages() {
        let local = local();
        let peer = scripted(&[1, 2, 3], &[1, 2, 3]);
        let sync = Synchronizer::new(Arc::clone(&local), SyncConfig::new().with_pull_batch_size(2));

        let report = sync.sync_from(&peer).unwrap();
        let origin = report.origin(ORIGIN).unwrap();
        assert_eq!(origin.applied, 3);
        assert_eq!(origin.high, Tsn::new(3));
        assert_eq!(local.check_high(ORIGIN).unwrap(), Tsn::new(3));
        assert_eq!(sync.state(), SyncState::Synced);
        assert_eq!(sync.stats().entries_applied, 3);

        let again = sync.sync_from(&peer).unwrap();
        assert_eq!(again.total_applied(), 0);
        assert!(again.origin(ORIGIN).is_some());
    }

    #[test]
    fn out_of_order_page_is_rejected() {
        let local = local();
        let peer = scripted(&[2, 1], &[1, 2]);
        let sync = Synchronizer::new(Arc::clone(&local), SyncConfig::default());

        let err = sync.sync_from(&peer).unwrap_err();
        assert!(matches!(err, SyncError::OutOfOrder { .. }));
        assert_eq!(local.check_high(ORIGIN).unwrap(), Tsn::ZERO);
        assert!(local.oplog_tail(ORIGIN, Tsn::ZERO).unwrap().is_empty());
    }

    #[test]
    fn wrong_origin_is_protocol_error() {
        let local = local();
        let peer = scripted(&[], &[]);
        peer.set_highs(vec![HighWaterMark::new(ORIGIN, Tsn::new(1))]);
        peer.set_tail(
            ORIGIN,
            vec![OplogEntry::new("power", ClockId::new(9), Tsn::new(1), OpKind::Insert, "k")],
        );
        let sync = Synchronizer::new(local, SyncConfig::default());

        assert!(matches!(sync.sync_from(&peer), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn missing_snapshot_keeps_progress() {
        let local = local();
        let peer = scripted(&[1, 2, 3], &[1]);
        let sync = Synchronizer::new(Arc::clone(&local), SyncConfig::default());

        let err = sync.sync_from(&peer).unwrap_err();
        assert!(matches!(err, SyncError::MissingSnapshot { .. }));
        assert_eq!(local.check_high(ORIGIN).unwrap(), Tsn::new(1));
        assert_eq!(sync.state(), SyncState::Error);
        assert_eq!(sync.stats().attempts_failed, 1);
        assert!(sync.stats().last_error.is_some());
    }

    #[test]
    fn disconnected_peer() {
        let sync = Synchronizer::new(local(), SyncConfig::default());
        let peer = scripted(&[1], &[1]);
        peer.set_connected(false);

        assert!(matches!(sync.sync_from(&peer), Err(SyncError::NotConnected)));
    }

    #[test]
    fn busy_synchronizer_rejects_second_attempt() {
        let sync = Synchronizer::new(local(), SyncConfig::default());
        *sync.state.write() = SyncState::Pulling;

        let err = sync.sync_from(&scripted(&[1], &[1])).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert_eq!(sync.stats().attempts_failed, 0);
    }

    #[test]
    fn retry_budget_is_spent_on_transport_errors() {
        let local = local();
        let peer = scripted(&[1, 2], &[1, 2]);
        peer.fail_things_after(Some(1));
        let retry = RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false);
        let sync = Synchronizer::new(Arc::clone(&local), SyncConfig::new().with_retry(retry));

        let err = sync.sync_with_retry(&peer).unwrap_err();
        assert!(err.is_retryable());
        let stats = sync.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.attempts_failed, 3);
        assert_eq!(local.check_high(ORIGIN).unwrap(), Tsn::new(1));
    }

    #[test]
    fn local_frontier_only_pulls_known_origins() {
        let local = local();
        let other = ClockId::new(3);
        let peer = scripted(&[1], &[1]);
        peer.set_identity(None);
        peer.set_highs(vec![
            HighWaterMark::new(ORIGIN, Tsn::new(1)),
            HighWaterMark::new(other, Tsn::new(5)),
        ]);
        let sync = Synchronizer::new(
            Arc::clone(&local),
            SyncConfig::new().with_frontier(FrontierSource::Local),
        );

        let report = sync.sync_from(&peer).unwrap();
        assert!(report.origins.is_empty());
        assert_eq!(local.check_high(ORIGIN).unwrap(), Tsn::ZERO);
    }
}

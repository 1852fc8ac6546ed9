//! Shared session management.
//!
//! One long-lived [`Session`] exists per node name. Creation for a name
//! happens at most once, even when many threads ask for it first at the same
//! time; callers asking for different names never wait on each other.

use crate::config::{Config, StoreLocation};
use crate::error::{NodeResult, Operation, StoreResult};
use crate::session::Session;
use crate::store::{JournalStore, NodeStore};
use crate::things::ThingFetcher;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Opens the store behind a node name.
pub trait StoreConnector: Send + Sync {
    /// Opens (or creates) the store for `name`.
    fn connect(&self, name: &str, config: &Config) -> StoreResult<Arc<dyn NodeStore>>;
}

/// Opens journal stores at the location the config template resolves.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateConnector;

impl StoreConnector for TemplateConnector {
    fn connect(&self, name: &str, config: &Config) -> StoreResult<Arc<dyn NodeStore>> {
        let store = match config.store_location(name)? {
            StoreLocation::Memory => JournalStore::open_in_memory()?,
            StoreLocation::File(path) => JournalStore::open_file(&path, config.sync_on_write)?,
        };
        Ok(Arc::new(store))
    }
}

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// Process-wide map from node name to its shared session.
pub struct SessionRegistry {
    config: Config,
    connector: Arc<dyn StoreConnector>,
    fetchers: Vec<(String, Arc<dyn ThingFetcher>)>,
    slots: RwLock<HashMap<String, Slot>>,
    connects: AtomicU64,
}

impl SessionRegistry {
    /// Creates a registry opening stores from `config`'s template.
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(TemplateConnector))
    }

    /// Creates a registry opening stores through `connector`.
    pub fn with_connector(config: Config, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            config,
            connector,
            fetchers: Vec::new(),
            slots: RwLock::new(HashMap::new()),
            connects: AtomicU64::new(0),
        }
    }

    /// Serves `class` through `fetcher` on every session created afterwards.
    #[must_use]
    pub fn with_thing_fetcher(mut self, class: impl Into<String>, fetcher: Arc<dyn ThingFetcher>) -> Self {
        self.fetchers.push((class.into(), fetcher));
        self
    }

    /// Returns the configuration sessions are created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the session for `name`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Connection`](crate::NodeError::Connection) if
    /// the store cannot be opened. A failed creation leaves the slot empty,
    /// so a later call retries.
    pub fn get_session(&self, name: &str) -> NodeResult<Arc<Session>> {
        let slot = self.slot(name);
        let mut guard = slot.lock();
        if let Some(session) = guard.as_ref() {
            return Ok(Arc::clone(session));
        }

        self.connects.fetch_add(1, Ordering::Relaxed);
        let store = self
            .connector
            .connect(name, &self.config)
            .map_err(|e| e.fold(Operation::Connect))?;
        let mut session = Session::new(name, store, &self.config)?;
        for (class, fetcher) in &self.fetchers {
            session = session.with_thing_fetcher(class, Arc::clone(fetcher))?;
        }

        let session = Arc::new(session);
        *guard = Some(Arc::clone(&session));
        info!(name, "session created");
        Ok(session)
    }

    /// Returns the names with an established session, sorted.
    pub fn names(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        let mut names: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    /// Returns how many times a store was opened.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    fn slot(&self, name: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(name) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(name.to_string()).or_default())
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .field("sessions", &self.names())
            .finish_non_exhaustive()
    }
}

static GLOBAL: OnceLock<SessionRegistry> = OnceLock::new();

/// Returns the process-wide registry, configured from the environment on
/// first use.
pub fn global_registry() -> &'static SessionRegistry {
    GLOBAL.get_or_init(|| SessionRegistry::new(Config::from_env()))
}

/// Returns the shared session for `name` from the process-wide registry.
pub fn get_session(name: &str) -> NodeResult<Arc<Session>> {
    global_registry().get_session(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeError;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;
    use tidemark_protocol::Tsn;

    struct Refusing;

    impl StoreConnector for Refusing {
        fn connect(&self, name: &str, _config: &Config) -> StoreResult<Arc<dyn NodeStore>> {
            Err(crate::StoreError::Unreachable(format!("{name}: connection refused")))
        }
    }

    /// Holds the connect for `slow` until released.
    struct Gated {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl StoreConnector for Gated {
        fn connect(&self, name: &str, config: &Config) -> StoreResult<Arc<dyn NodeStore>> {
            if name == "slow" {
                let _ = self.entered.lock().send(());
                let _ = self.release.lock().recv();
            }
            TemplateConnector.connect(name, config)
        }
    }

    #[test]
    fn same_name_same_session() {
        let registry = SessionRegistry::new(Config::default());
        let a = registry.get_session("engine3").unwrap();
        let b = registry.get_session("engine3").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get_session("master").unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.names(), vec!["engine3", "master"]);
        assert_eq!(registry.connect_count(), 2);
    }

    #[test]
    fn concurrent_first_access_creates_once() {
        let registry = Arc::new(SessionRegistry::new(Config::default()));
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let session = registry.get_session("shared").unwrap();
                    session.new_tsn().unwrap()
                })
            })
            .collect();

        let mut tsns: Vec<Tsn> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        tsns.sort();
        tsns.dedup();
        assert_eq!(tsns.len(), 16);
        assert_eq!(registry.connect_count(), 1);
    }

    #[test]
    fn failed_connect_is_retried() {
        let registry = SessionRegistry::with_connector(Config::default(), Arc::new(Refusing));
        for _ in 0..2 {
            assert!(matches!(
                registry.get_session("down"),
                Err(NodeError::Connection(_))
            ));
        }
        assert_eq!(registry.connect_count(), 2);
        assert!(registry.names().is_empty());
    }

    #[test]
    fn listing_during_slow_connect_does_not_block_other_names() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = Arc::new(SessionRegistry::with_connector(
            Config::default(),
            Arc::new(Gated {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
        ));

        let slow = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get_session("slow").map(|_| ()))
        };
        entered_rx.recv().unwrap();

        let lister = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.names())
        };
        thread::sleep(Duration::from_millis(50));

        let (done_tx, done_rx) = mpsc::channel();
        {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let result = registry.get_session("fast").map(|_| ());
                let _ = done_tx.send(result);
            });
        }
        let fast = done_rx.recv_timeout(Duration::from_secs(5));
        release_tx.send(()).unwrap();

        assert!(matches!(fast, Ok(Ok(()))), "fast session waited on the slow one");
        slow.join().unwrap().unwrap();
        assert!(lister.join().unwrap().contains(&"slow".to_string()));
        assert_eq!(registry.names(), vec!["fast", "slow"]);
    }

    #[test]
    fn global_registry_is_shared() {
        let a = get_session("global-test").unwrap();
        let b = get_session("global-test").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

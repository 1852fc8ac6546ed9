//! Crash simulation for journal recovery.
//!
//! A [`CrashableBackend`] wraps another backend and cuts a write short once
//! a byte budget is spent, leaving a torn record at the tail of the journal.
//! Reopening a store over the surviving bytes must recover every record
//! written before the crash and nothing after it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tidemark_core::{JournalStore, KeyedStore, Session};
use tidemark_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

use crate::fixtures::{test_config, TEST_CLASS};

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

/// Controls a [`CrashableBackend`] after it was handed to a store.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Returns the bytes accepted so far.
    pub fn bytes_written(&self) -> usize {
        self.state.bytes_written.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_on_sync: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a switch that stays usable after the backend is boxed.
    pub fn switch(&self) -> CrashSwitch {
        CrashSwitch {
            state: Arc::clone(&self.state),
        }
    }

    fn crash(message: &str) -> StorageError {
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(Self::crash("backend crashed"));
        }
        let current = self.state.bytes_written.load(Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current + data.len() > threshold {
            self.state.crashed.store(true, Ordering::SeqCst);
            let partial = threshold.saturating_sub(current);
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
                self.state.bytes_written.fetch_add(partial, Ordering::SeqCst);
            }
            return Err(Self::crash("simulated crash during partial write"));
        }

        let offset = self.inner.append(data)?;
        self.state.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(Self::crash("simulated crash during sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Keys expected after recovery.
    pub expected_keys: usize,
    /// Keys found after recovery.
    pub actual_keys: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn check(description: String, expected: usize, recovered: Result<usize, String>) -> Self {
        match recovered {
            Ok(actual) => Self {
                passed: actual == expected,
                description,
                expected_keys: expected,
                actual_keys: actual,
                error: (actual != expected).then(|| format!("expected {expected} keys, found {actual}")),
            },
            Err(error) => Self {
                passed: false,
                description,
                expected_keys: expected,
                actual_keys: 0,
                error: Some(error),
            },
        }
    }
}

fn open_node(backend: Box<dyn StorageBackend>) -> Result<Session, String> {
    let store = JournalStore::open(backend, false).map_err(|e| e.to_string())?;
    Session::new("crash", Arc::new(store), &test_config()).map_err(|e| e.to_string())
}

fn count_keys(session: &Session) -> Result<usize, String> {
    session
        .table(TEST_CLASS)
        .and_then(|t| t.keys())
        .map(|keys| keys.len())
        .map_err(|e| e.to_string())
}

/// Commits `committed` keys, crashes `torn_bytes` into the next commit and
/// checks that reopening recovers exactly the committed keys.
pub fn crash_during_commit(committed: usize, torn_bytes: usize) -> CrashRecoveryResult {
    let description = format!("crash {torn_bytes} bytes into commit #{}", committed + 1);
    let memory = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(memory.clone()));
    let switch = backend.switch();

    let run = || -> Result<usize, String> {
        let session = open_node(Box::new(backend))?;
        session
            .register_local(None, "tcp://crash", b"")
            .map_err(|e| e.to_string())?;
        let table = session.table(TEST_CLASS).map_err(|e| e.to_string())?;
        for i in 0..committed {
            table.put(&format!("key-{i}"), vec![1]).map_err(|e| e.to_string())?;
        }

        switch.crash_after(torn_bytes);
        if table.put("torn", vec![2]).is_ok() {
            return Err("commit past the crash point succeeded".into());
        }
        drop(session);

        let recovered = open_node(Box::new(memory.clone()))?;
        let keys = count_keys(&recovered)?;
        if recovered.table(TEST_CLASS).and_then(|t| t.get("torn")).map_err(|e| e.to_string())?.is_some() {
            return Err("torn commit survived recovery".into());
        }
        Ok(keys)
    };

    CrashRecoveryResult::check(description, committed, run())
}

/// Runs [`crash_during_commit`] for every torn length from zero up to
/// `max_torn_bytes`.
pub fn crash_sweep(committed: usize, max_torn_bytes: usize) -> Vec<CrashRecoveryResult> {
    (0..=max_torn_bytes)
        .map(|torn| crash_during_commit(committed, torn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_switch() {
        let backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let switch = backend.switch();
        let mut backend: Box<dyn StorageBackend> = Box::new(backend);

        backend.append(b"hello").unwrap();
        switch.crash_after(2);
        assert!(backend.append(b"world").is_err());
        assert!(switch.has_crashed());
        assert_eq!(backend.size().unwrap(), 7);
        assert!(backend.append(b"!").is_err());
    }

    #[test]
    fn test_fail_on_sync() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        backend.switch().set_fail_on_sync(true);
        assert!(backend.sync().is_err());
    }

    #[test]
    fn test_crash_mid_commit_recovers() {
        let result = crash_during_commit(3, 7);
        assert!(result.passed, "{result:?}");
        assert_eq!(result.actual_keys, 3);
    }

    #[test]
    fn test_crash_sweep() {
        for result in crash_sweep(2, 24) {
            assert!(result.passed, "{result:?}");
        }
    }
}

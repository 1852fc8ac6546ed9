//! Stress tests for Tidemark.
//!
//! These helpers drive a single session from many threads and check that
//! sequences stay unique and the oplog stays gap-free.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tidemark_core::{KeyedStore, Session};
use tidemark_protocol::Tsn;

use crate::fixtures::TEST_CLASS;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct keys written.
    pub key_count: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            key_count: 100,
            value_size: 64,
        }
    }
}

/// Issues tsns from every thread at once.
///
/// Returns the run result and every tsn issued. The tsns are unique
/// exactly when their count equals `successful_ops`.
pub fn stress_concurrent_tsns(session: Arc<Session>, config: &StressConfig) -> (StressTestResult, BTreeSet<Tsn>) {
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let session = Arc::clone(&session);
            let failed = Arc::clone(&failed);
            let operations = config.operations;

            thread::spawn(move || {
                let mut issued = Vec::with_capacity(operations);
                for _ in 0..operations {
                    match session.new_tsn() {
                        Ok(tsn) => issued.push(tsn),
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                issued
            })
        })
        .collect();

    let mut all = BTreeSet::new();
    let mut successful = 0;
    for handle in handles {
        let issued = handle.join().expect("Thread panicked");
        successful += issued.len();
        all.extend(issued);
    }

    let result = StressTestResult::new(successful, failed.load(Ordering::Relaxed), start.elapsed());
    (result, all)
}

/// Writes and deletes keys of [`TEST_CLASS`] from every thread at once.
///
/// The session must be registered.
pub fn stress_concurrent_writes(session: Arc<Session>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let session = Arc::clone(&session);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                let Ok(table) = session.table(TEST_CLASS) else {
                    failed.fetch_add(config.operations, Ordering::Relaxed);
                    return;
                };
                let value = vec![t as u8; config.value_size];
                for i in 0..config.operations {
                    let key = format!("key-{}", (t * config.operations + i) % config.key_count.max(1));
                    let result = if i % 4 == 3 {
                        table.delete(&key)
                    } else {
                        table.put(&key, value.clone())
                    };
                    match result {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

//! Run-scoped dedup cache.
//!
//! Maps `run_id -> content identifier -> scan_id`. Each run's entries live
//! for `ttl` after the last insert into that run; idle runs are evicted on
//! every access.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default lifetime of an idle run
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug)]
struct RunCache {
    entries: Mutex<HashMap<String, String>>,
    touched: Mutex<Instant>,
}

impl RunCache {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            touched: Mutex::new(Instant::now()),
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.touched.lock().elapsed() >= ttl
    }
}

/// Advisory cache of scans already scheduled within a run
#[derive(Debug)]
pub struct ScanRunCache {
    ttl: Duration,
    runs: Mutex<HashMap<String, Arc<RunCache>>>,
}

impl Default for ScanRunCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ScanRunCache {
    /// Cache whose runs expire `ttl` after their last insert
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn evict_expired(&self, runs: &mut HashMap<String, Arc<RunCache>>) {
        let ttl = self.ttl;
        runs.retain(|_, run| !run.expired(ttl));
    }

    fn run(&self, run_id: &str) -> Arc<RunCache> {
        let mut runs = self.runs.lock();
        self.evict_expired(&mut runs);
        runs.entry(run_id.to_string())
            .or_insert_with(|| Arc::new(RunCache::new()))
            .clone()
    }

    /// Record that `content_id` was scheduled as `scan_id` in `run_id`.
    ///
    /// Resets the run's expiry timer.
    pub fn add_scan(&self, run_id: &str, content_id: &str, scan_id: &str) {
        let run = self.run(run_id);
        run.entries
            .lock()
            .insert(content_id.to_string(), scan_id.to_string());
        *run.touched.lock() = Instant::now();
    }

    /// Scan id previously recorded for `content_id` in `run_id`
    #[must_use]
    pub fn contains_scan(&self, run_id: &str, content_id: &str) -> Option<String> {
        let mut runs = self.runs.lock();
        self.evict_expired(&mut runs);
        let run = runs.get(run_id)?;
        let entries = run.entries.lock();
        entries.get(content_id).cloned()
    }

    /// Number of runs currently tracked
    #[must_use]
    pub fn run_count(&self) -> usize {
        let mut runs = self.runs.lock();
        self.evict_expired(&mut runs);
        runs.len()
    }
}

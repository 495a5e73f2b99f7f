//! Crawl statistics and progress observation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters shared across workers. Incremented lock-free; a
/// [`StatsSnapshot`] is taken for reporting.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub enqueued: AtomicU64,
    pub deduplicated: AtomicU64,
    pub depth_dropped: AtomicU64,
    pub fetched: AtomicU64,
    pub retried: AtomicU64,
    pub robots_denied: AtomicU64,
    pub failed: AtomicU64,
    pub yielded: AtomicU64,
    pub dropped_by_hook: AtomicU64,
    pub cache_hits: AtomicU64,
}

impl CrawlStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            depth_dropped: self.depth_dropped.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            robots_denied: self.robots_denied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            yielded: self.yielded.load(Ordering::Relaxed),
            dropped_by_hook: self.dropped_by_hook.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub depth_dropped: u64,
    pub fetched: u64,
    pub retried: u64,
    pub robots_denied: u64,
    pub failed: u64,
    pub yielded: u64,
    pub dropped_by_hook: u64,
    pub cache_hits: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "enqueued={} deduplicated={} fetched={} retried={} robots_denied={} \
             failed={} yielded={} dropped_by_hook={} cache_hits={}",
            self.enqueued,
            self.deduplicated,
            self.fetched,
            self.retried,
            self.robots_denied,
            self.failed,
            self.yielded,
            self.dropped_by_hook,
            self.cache_hits
        )
    }
}

/// Receives a counter snapshot after each completed task when the
/// `progress` option is set.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: &StatsSnapshot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = CrawlStats::default();
        CrawlStats::incr(&stats.enqueued);
        CrawlStats::incr(&stats.enqueued);
        CrawlStats::incr(&stats.yielded);
        let snap = stats.snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.yielded, 1);
        assert_eq!(snap.failed, 0);
    }
}

//! The crawl frontier: FIFO task queue, global URL deduplication, and
//! completion detection.
//!
//! Deduplication happens at enqueue: inserting the canonical URL into
//! the shared seen-set is atomic, so a URL is fetched at most once per
//! run regardless of which worker discovers it. The outstanding-work
//! counter (tasks enqueued and not yet completed) is the termination
//! oracle: `next()` returns `None` exactly when it reaches zero with an
//! empty queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::stats::CrawlStats;
use crate::util;

use super::task::CrawlTask;

pub struct Frontier {
    queue: Mutex<VecDeque<CrawlTask>>,
    notify: Notify,
    outstanding: AtomicUsize,
    seen: DashSet<String>,
    stats: Arc<CrawlStats>,
}

impl Frontier {
    pub fn new(stats: Arc<CrawlStats>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            outstanding: AtomicUsize::new(0),
            seen: DashSet::new(),
            stats,
        }
    }

    /// Enqueue a task unless it is a duplicate or over its depth bound.
    /// Returns whether the task was accepted.
    pub fn enqueue(&self, task: CrawlTask) -> bool {
        let key = util::canonical_url(&task.url);
        if !self.seen.insert(key) {
            CrawlStats::incr(&self.stats.deduplicated);
            tracing::debug!(url = task.url.as_str(), "duplicate URL dropped");
            return false;
        }
        if task.depth > task.depth_limit {
            CrawlStats::incr(&self.stats.depth_dropped);
            tracing::debug!(
                url = task.url.as_str(),
                depth = task.depth,
                limit = task.depth_limit,
                "task over depth limit dropped"
            );
            return false;
        }
        CrawlStats::incr(&self.stats.enqueued);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().push_back(task);
        self.notify.notify_waiters();
        true
    }

    /// Pop the next task, waiting while workers may still enqueue more.
    /// Returns `None` once no task is queued and none is outstanding.
    pub async fn next(&self) -> Option<CrawlTask> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before re-checking so a wakeup between the check
            // and the await is not lost
            notified.as_mut().enable();
            if let Some(task) = self.queue.lock().pop_front() {
                return Some(task);
            }
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return None;
            }
            notified.await;
        }
    }

    /// Mark one popped task as fully processed.
    pub fn task_done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Discard every queued task (cancellation drain). Popped tasks are
    /// still completed by their workers.
    pub fn drain(&self) -> usize {
        let drained: Vec<CrawlTask> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        for _ in &drained {
            self.task_done();
        }
        drained.len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

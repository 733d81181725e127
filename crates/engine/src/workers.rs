//! Watch re-evaluation workers.
//!
//! A fixed pool of threads pulling watch tokens from a bounded FIFO queue.
//! A token already waiting in the queue is not queued twice, so a burst of
//! mutations touching one watch costs a single re-evaluation. Submitting
//! never blocks: a full queue rejects the token.

use exocore_core::{Error, Result, WatchToken};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Token queued
    Queued,
    /// Token was already waiting
    Coalesced,
    /// Queue full or pool shut down
    Rejected,
}

/// Worker pool metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tokens waiting in the queue.
    pub queue_depth: usize,
    /// Tokens being re-evaluated.
    pub active_tasks: usize,
    /// Re-evaluations finished since creation.
    pub tasks_completed: u64,
    /// Submissions rejected because the queue was full.
    pub rejected: u64,
    /// Number of worker threads.
    pub worker_count: usize,
}

type Evaluate = dyn Fn(WatchToken) + Send + Sync;

#[derive(Default)]
struct Queue {
    tokens: VecDeque<WatchToken>,
    queued: FxHashSet<WatchToken>,
}

struct WorkersInner {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
    rejected: AtomicU64,
    evaluate: Box<Evaluate>,
}

/// Pool of watch re-evaluation threads
pub struct WatchWorkers {
    inner: Arc<WorkersInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WatchWorkers {
    /// Start `num_threads` workers running `evaluate` for each dequeued token.
    ///
    /// Workers are named `exocore-watch-0`, `exocore-watch-1`, etc.
    pub fn new(
        num_threads: usize,
        max_queue_depth: usize,
        evaluate: impl Fn(WatchToken) + Send + Sync + 'static,
    ) -> Result<Self> {
        let inner = Arc::new(WorkersInner {
            queue: Mutex::new(Queue::default()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            evaluate: Box::new(evaluate),
        });

        let pool = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };
        for i in 0..num_threads {
            let inner = Arc::clone(&pool.inner);
            let handle = std::thread::Builder::new()
                .name(format!("exocore-watch-{}", i))
                .spawn(move || worker_loop(&inner))
                .map_err(|e| {
                    Error::IndexUnavailable(format!("failed to spawn watch worker: {}", e))
                });
            match handle {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    /// Queue a token for re-evaluation.
    pub fn submit(&self, token: WatchToken) -> Submitted {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            return Submitted::Rejected;
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.queued.contains(&token) {
                return Submitted::Coalesced;
            }
            if queue.tokens.len() >= self.inner.max_queue_depth {
                self.inner.rejected.fetch_add(1, AtomicOrdering::Relaxed);
                return Submitted::Rejected;
            }
            queue.queued.insert(token);
            queue.tokens.push_back(token);
        }

        self.inner.work_ready.notify_one();
        Submitted::Queued
    }

    /// Block until all queued and in-flight re-evaluations have completed.
    ///
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.tokens.is_empty() || self.inner.active_tasks.load(AtomicOrdering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Signal workers to exit and join them.
    ///
    /// Workers finish the queued tokens first. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);

        // Notify under the queue lock so a worker between its shutdown check
        // and `wait` cannot miss the wakeup.
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let current = std::thread::current().id();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    /// Whether `shutdown` was called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(AtomicOrdering::Acquire)
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            queue_depth: self.inner.queue.lock().tokens.len(),
            active_tasks: self.inner.active_tasks.load(AtomicOrdering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(AtomicOrdering::Acquire),
            rejected: self.inner.rejected.load(AtomicOrdering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for WatchWorkers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` and wakes drain waiters, also when the
/// evaluation panics.
struct ActiveTaskGuard<'a> {
    inner: &'a WorkersInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        self.inner
            .tasks_completed
            .fetch_add(1, AtomicOrdering::Release);
        let prev_active = self.inner.active_tasks.fetch_sub(1, AtomicOrdering::AcqRel);

        let queue = self.inner.queue.lock();
        if prev_active == 1 && queue.tokens.is_empty() {
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &WorkersInner) {
    loop {
        let token = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(token) = queue.tokens.pop_front() {
                    queue.queued.remove(&token);
                    inner.active_tasks.fetch_add(1, AtomicOrdering::Release);
                    break token;
                }
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };

        if let Err(e) =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (inner.evaluate)(token)))
        {
            tracing::error!(
                target: "exocore::watch",
                token,
                "watch re-evaluation panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_submit_and_drain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let workers = WatchWorkers::new(2, 64, move |token| s.lock().push(token)).unwrap();

        for token in 1..=10 {
            assert_eq!(workers.submit(token), Submitted::Queued);
        }
        workers.drain();

        let mut seen = seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
        assert_eq!(workers.stats().tasks_completed, 10);
        workers.shutdown();
    }

    #[test]
    fn test_waiting_token_is_coalesced() {
        let gate = Arc::new(Barrier::new(2));
        let runs = Arc::new(AtomicUsize::new(0));
        let (g, r) = (Arc::clone(&gate), Arc::clone(&runs));
        let workers = WatchWorkers::new(1, 64, move |token| {
            if token == 0 {
                g.wait();
            } else {
                r.fetch_add(1, AtomicOrdering::Relaxed);
            }
        })
        .unwrap();

        // park the only worker on token 0
        workers.submit(0);
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(workers.submit(7), Submitted::Queued);
        assert_eq!(workers.submit(7), Submitted::Coalesced);
        assert_eq!(workers.submit(7), Submitted::Coalesced);

        gate.wait();
        workers.drain();
        assert_eq!(runs.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_full_queue_rejects() {
        let gate = Arc::new(Barrier::new(2));
        let g = Arc::clone(&gate);
        let workers = WatchWorkers::new(1, 2, move |token| {
            if token == 0 {
                g.wait();
            }
        })
        .unwrap();

        workers.submit(0);
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(workers.submit(1), Submitted::Queued);
        assert_eq!(workers.submit(2), Submitted::Queued);
        assert_eq!(workers.submit(3), Submitted::Rejected);
        assert_eq!(workers.stats().rejected, 1);

        gate.wait();
        workers.drain();
    }

    #[test]
    fn test_panicking_evaluation_keeps_worker_alive() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let workers = WatchWorkers::new(1, 64, move |token| {
            if token == 1 {
                panic!("boom");
            }
            r.fetch_add(1, AtomicOrdering::Relaxed);
        })
        .unwrap();

        workers.submit(1);
        workers.submit(2);
        workers.drain();
        assert_eq!(runs.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(workers.stats().tasks_completed, 2);
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let workers = WatchWorkers::new(1, 64, |_| {}).unwrap();
        workers.shutdown();
        assert!(workers.is_shut_down());
        assert_eq!(workers.submit(1), Submitted::Rejected);
        // second shutdown is a no-op
        workers.shutdown();
    }
}

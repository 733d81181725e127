//! Operation id allocation
//!
//! A single monotonic counter for the whole store. Every accepted mutation
//! takes exactly one id; ids are never reused, so a gap (an id taken by a
//! mutation that was later rejected) is allowed but a repeat is not.
//!
//! Exhaustion is fatal: once the counter cannot advance, every further call
//! fails with `Error::AllocatorExhausted` and the caller must halt the
//! mutation path.

use exocore_core::{Error, OperationId, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Issues strictly increasing operation ids
#[derive(Debug)]
pub struct OperationIdAllocator {
    /// Last id handed out (or observed); 0 before the first
    last: AtomicU64,
    /// Sticky exhaustion flag
    exhausted: AtomicBool,
}

impl Default for OperationIdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl OperationIdAllocator {
    /// Create an allocator whose first id is `last_issued + 1`
    pub fn new(last_issued: OperationId) -> Self {
        OperationIdAllocator {
            last: AtomicU64::new(last_issued),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Create an allocator seeded from the current UTC time in microseconds
    ///
    /// Ids stay roughly time-ordered across restarts without persisting the
    /// counter; `observe` still has to be fed every id already in the log.
    pub fn from_clock() -> Self {
        let micros = chrono::Utc::now().timestamp_micros().max(0) as u64;
        Self::new(micros)
    }

    /// Allocate the next id
    pub fn next(&self) -> Result<OperationId> {
        if self.exhausted.load(Ordering::Acquire) {
            return Err(Error::AllocatorExhausted);
        }
        match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
        {
            Ok(previous) => Ok(previous + 1),
            Err(_) => {
                self.exhausted.store(true, Ordering::Release);
                tracing::error!(target: "exocore::log", "Operation id space exhausted");
                Err(Error::AllocatorExhausted)
            }
        }
    }

    /// Advance past `id` if it is ahead; never moves backwards
    pub fn observe(&self, id: OperationId) {
        self.last.fetch_max(id, Ordering::SeqCst);
    }

    /// Take an id issued elsewhere (log ingestion)
    ///
    /// Fails with a validation error, leaving the counter untouched, unless
    /// `id` is above every id issued, observed or claimed so far. A claimed
    /// id is never handed out by `next`.
    pub fn claim(&self, id: OperationId) -> Result<()> {
        self.last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (id > last).then_some(id)
            })
            .map(|_| ())
            .map_err(|last| {
                Error::validation(format!(
                    "operation id {} is not above last issued id {}",
                    id, last
                ))
            })
    }

    /// Last id issued or observed
    pub fn last_issued(&self) -> OperationId {
        self.last.load(Ordering::SeqCst)
    }

    /// Whether the id space is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }
}

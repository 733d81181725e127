//! Per-entity write serialization
//!
//! Mutations of one entity run one at a time so that operation id
//! assignment, the CAS check and the index update are atomic relative to
//! that entity. Mutations of different entities never share a lock.

use dashmap::DashMap;
use exocore_core::EntityId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Lock table keyed by entity id
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: DashMap<EntityId, Arc<Mutex<()>>>,
}

impl EntityLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the write lock of `entity_id`
    ///
    /// The table entry is cloned out before locking so the DashMap shard is
    /// never held while `f` runs.
    pub fn with_entity<R>(&self, entity_id: &EntityId, f: impl FnOnce() -> R) -> R {
        let lock = self
            .locks
            .entry(entity_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        f()
    }

    /// Number of entities that ever took a lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock was ever taken
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

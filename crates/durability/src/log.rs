//! Mutation log
//!
//! Ordered, append-only record of every accepted mutation, keyed by its
//! operation id. The log is the source of truth the trait index is derived
//! from; it is also the audit trail, so compaction never erases entries, it
//! only marks them as superseded by the compacting operation.
//!
//! ## Guarantees
//!
//! 1. **Ordering**: iteration follows operation id order, whatever the order
//!    entities appended in
//! 2. **Idempotence**: re-appending an operation id for the same entity is
//!    detected and skipped
//! 3. **Ownership**: an operation id belongs to exactly one entity; a clash is
//!    fatal
//! 4. **Compaction**: a compaction only references live operations of its own
//!    entity and trait, and lists every live one from its lowest id up to the
//!    trait's latest

use chrono::{DateTime, Utc};
use exocore_core::{
    EntityId, EntityMutation, Error, Mutation, OperationId, Result, Trait, TraitId,
};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commit state of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatus {
    /// Applied locally, not yet committed
    Pending,
    /// Committed to the chain
    Chain,
}

/// When appended entries become committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Entries are committed as they are appended
    #[default]
    Immediate,
    /// Entries stay pending until `commit_through` / `commit_all`
    Manual,
}

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New entry recorded
    Appended,
    /// The operation id was already recorded for this entity; nothing changed
    Duplicate,
}

/// One recorded mutation
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Operation id owning this entry
    pub operation_id: OperationId,
    /// Mutated entity
    pub entity_id: EntityId,
    /// The mutation as accepted
    pub mutation: Mutation,
    /// Commit state
    pub status: CommitStatus,
    /// Compaction operation that superseded this entry
    pub compacted_by: Option<OperationId>,
    /// Local time the entry was appended
    pub appended_at: DateTime<Utc>,
}

impl LogEntry {
    /// Whether this entry still contributes to live state
    pub fn is_live(&self) -> bool {
        self.compacted_by.is_none()
    }

    /// Trait targeted by the entry, if any
    pub fn trait_id(&self) -> Option<&TraitId> {
        self.mutation.trait_id()
    }

    fn targets(&self, trait_id: &TraitId) -> bool {
        self.trait_id() == Some(trait_id)
    }
}

#[derive(Debug, Default)]
struct LogInner {
    entries: BTreeMap<OperationId, LogEntry>,
    by_entity: FxHashMap<EntityId, Vec<OperationId>>,
}

impl LogInner {
    /// Live entries of one trait, in operation id order
    fn live_trait_ops(&self, entity_id: &EntityId, trait_id: &TraitId) -> Vec<OperationId> {
        let mut ops: Vec<OperationId> = self
            .by_entity
            .get(entity_id)
            .map(|ops| {
                ops.iter()
                    .copied()
                    .filter(|op| {
                        self.entries
                            .get(op)
                            .map_or(false, |e| e.is_live() && e.targets(trait_id))
                    })
                    .collect()
            })
            .unwrap_or_default();
        ops.sort_unstable();
        ops
    }

    fn check_compaction(
        &self,
        entity_id: &EntityId,
        trait_id: &TraitId,
        operation_ids: &[OperationId],
    ) -> Result<()> {
        if operation_ids.is_empty() {
            return Err(Error::validation("compaction lists no operations"));
        }
        for op in operation_ids {
            let entry = self.entries.get(op).ok_or_else(|| {
                Error::validation(format!("compaction references unknown operation {}", op))
            })?;
            if &entry.entity_id != entity_id {
                return Err(Error::validation(format!(
                    "operation {} belongs to entity {}, not {}",
                    op, entry.entity_id, entity_id
                )));
            }
            if !entry.targets(trait_id) {
                return Err(Error::validation(format!(
                    "operation {} does not target trait {}",
                    op, trait_id
                )));
            }
            if let Some(by) = entry.compacted_by {
                return Err(Error::validation(format!(
                    "operation {} was already compacted by {}",
                    op, by
                )));
            }
        }
        let live = self.live_trait_ops(entity_id, trait_id);
        if let Some(latest) = live.last() {
            if !operation_ids.contains(latest) {
                return Err(Error::validation(format!(
                    "compaction of {}/{} omits its latest operation {}",
                    entity_id, trait_id, latest
                )));
            }
        }
        // listed ops form a contiguous suffix of the trait's live ops
        let first = operation_ids.iter().min().copied().unwrap_or_default();
        if let Some(skipped) = live
            .iter()
            .find(|op| **op > first && !operation_ids.contains(op))
        {
            return Err(Error::validation(format!(
                "compaction of {}/{} skips live operation {}",
                entity_id, trait_id, skipped
            )));
        }
        Ok(())
    }
}

/// Append-only mutation log
#[derive(Debug, Default)]
pub struct MutationLog {
    inner: RwLock<LogInner>,
    commit_mode: CommitMode,
}

impl MutationLog {
    /// Create an empty log
    pub fn new(commit_mode: CommitMode) -> Self {
        MutationLog {
            inner: RwLock::new(LogInner::default()),
            commit_mode,
        }
    }

    /// Commit mode of this log
    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// Record `mutation` under `operation_id`
    ///
    /// A compaction is validated against the log and marks the operations it
    /// lists as superseded. Re-appending an id already owned by the same
    /// entity returns `AppendOutcome::Duplicate` without touching the log.
    ///
    /// # Errors
    ///
    /// - `Error::LogAppend` if the id is 0 or owned by another entity
    /// - `Error::Validation` for an invalid compaction
    pub fn append(
        &self,
        mutation: &EntityMutation,
        operation_id: OperationId,
    ) -> Result<AppendOutcome> {
        if operation_id == 0 {
            return Err(Error::LogAppend("operation id 0 is reserved".to_string()));
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.entries.get(&operation_id) {
            if existing.entity_id == mutation.entity_id {
                tracing::debug!(
                    target: "exocore::log",
                    operation_id,
                    entity_id = %mutation.entity_id,
                    "Skipped replayed operation"
                );
                return Ok(AppendOutcome::Duplicate);
            }
            tracing::error!(
                target: "exocore::log",
                operation_id,
                owner = %existing.entity_id,
                entity_id = %mutation.entity_id,
                "Operation id clash"
            );
            return Err(Error::LogAppend(format!(
                "operation {} already belongs to entity {}",
                operation_id, existing.entity_id
            )));
        }

        if let Mutation::CompactTrait(compact) = &mutation.mutation {
            let ops: Vec<OperationId> = compact
                .compacted_operations
                .iter()
                .map(|c| c.operation_id)
                .collect();
            inner.check_compaction(&mutation.entity_id, &compact.r#trait.id, &ops)?;
            for op in &ops {
                if let Some(entry) = inner.entries.get_mut(op) {
                    entry.compacted_by = Some(operation_id);
                }
            }
            tracing::debug!(
                target: "exocore::log",
                operation_id,
                entity_id = %mutation.entity_id,
                trait_id = %compact.r#trait.id,
                compacted = ops.len(),
                "Compacted trait operations"
            );
        }

        let status = match self.commit_mode {
            CommitMode::Immediate => CommitStatus::Chain,
            CommitMode::Manual => CommitStatus::Pending,
        };
        inner.entries.insert(
            operation_id,
            LogEntry {
                operation_id,
                entity_id: mutation.entity_id.clone(),
                mutation: mutation.mutation.clone(),
                status,
                compacted_by: None,
                appended_at: Utc::now(),
            },
        );
        inner
            .by_entity
            .entry(mutation.entity_id.clone())
            .or_default()
            .push(operation_id);

        tracing::trace!(
            target: "exocore::log",
            operation_id,
            entity_id = %mutation.entity_id,
            kind = mutation.mutation.kind(),
            "Appended"
        );
        Ok(AppendOutcome::Appended)
    }

    /// Record a compaction of `operation_ids` into `resulting_trait`
    pub fn compact(
        &self,
        entity_id: &EntityId,
        operation_ids: &[OperationId],
        resulting_trait: Trait,
        operation_id: OperationId,
    ) -> Result<AppendOutcome> {
        let mutation = EntityMutation::compact_trait(entity_id.clone(), operation_ids, resulting_trait);
        self.append(&mutation, operation_id)
    }

    /// Check a compaction without recording it
    pub fn validate_compaction(
        &self,
        entity_id: &EntityId,
        trait_id: &TraitId,
        operation_ids: &[OperationId],
    ) -> Result<()> {
        self.inner
            .read()
            .check_compaction(entity_id, trait_id, operation_ids)
    }

    /// Fold `operation_ids` into the trait state they produce
    ///
    /// Folding starts from the state left by the trait's live operations that
    /// precede the first listed one and are not themselves listed. Returns
    /// `None` if the trait does not exist afterwards.
    pub fn replay_trait(
        &self,
        entity_id: &EntityId,
        trait_id: &TraitId,
        operation_ids: &[OperationId],
    ) -> Result<Option<Trait>> {
        let inner = self.inner.read();
        let mut ops = operation_ids.to_vec();
        ops.sort_unstable();
        let listed: FxHashSet<OperationId> = ops.iter().copied().collect();
        let first = ops.first().copied().unwrap_or(OperationId::MAX);

        let base = inner
            .live_trait_ops(entity_id, trait_id)
            .into_iter()
            .filter(|op| *op < first && !listed.contains(op));

        let now = Utc::now();
        let mut state: Option<Trait> = None;
        for op in base.chain(ops.iter().copied()) {
            let entry = inner.entries.get(&op).ok_or_else(|| {
                Error::validation(format!("replay references unknown operation {}", op))
            })?;
            if &entry.entity_id != entity_id {
                return Err(Error::validation(format!(
                    "operation {} belongs to entity {}, not {}",
                    op, entry.entity_id, entity_id
                )));
            }
            state = match &entry.mutation {
                Mutation::DeleteEntity(_) => None,
                m if entry.targets(trait_id) => m.fold_trait(state.as_ref(), now),
                _ => state,
            };
        }
        Ok(state)
    }

    /// Mark every pending entry up to `operation_id` as committed
    ///
    /// Returns the number of entries whose status changed.
    pub fn commit_through(&self, operation_id: OperationId) -> usize {
        let mut inner = self.inner.write();
        let mut committed = 0;
        for entry in inner.entries.range_mut(..=operation_id).map(|(_, e)| e) {
            if entry.status == CommitStatus::Pending {
                entry.status = CommitStatus::Chain;
                committed += 1;
            }
        }
        if committed > 0 {
            tracing::debug!(target: "exocore::log", operation_id, committed, "Committed entries");
        }
        committed
    }

    /// Mark every pending entry as committed
    pub fn commit_all(&self) -> usize {
        self.commit_through(OperationId::MAX)
    }

    /// Commit status of an operation
    pub fn status(&self, operation_id: OperationId) -> Option<CommitStatus> {
        self.inner.read().entries.get(&operation_id).map(|e| e.status)
    }

    /// Entity owning an operation
    pub fn entity_of(&self, operation_id: OperationId) -> Option<EntityId> {
        self.inner
            .read()
            .entries
            .get(&operation_id)
            .map(|e| e.entity_id.clone())
    }

    /// Entry recorded under an operation id
    pub fn get(&self, operation_id: OperationId) -> Option<LogEntry> {
        self.inner.read().entries.get(&operation_id).cloned()
    }

    /// Operation ids recorded for an entity, in append order
    pub fn operations_for_entity(&self, entity_id: &EntityId) -> Vec<OperationId> {
        self.inner
            .read()
            .by_entity
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Entries recorded for an entity, in operation id order
    pub fn entries_for_entity(&self, entity_id: &EntityId) -> Vec<LogEntry> {
        let inner = self.inner.read();
        let mut entries: Vec<LogEntry> = inner
            .by_entity
            .get(entity_id)
            .map(|ops| {
                ops.iter()
                    .filter_map(|op| inner.entries.get(op).cloned())
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|e| e.operation_id);
        entries
    }

    /// Live operations of one trait, in operation id order
    pub fn live_operations(&self, entity_id: &EntityId, trait_id: &TraitId) -> Vec<OperationId> {
        self.inner.read().live_trait_ops(entity_id, trait_id)
    }

    /// Highest recorded operation id
    pub fn last_operation_id(&self) -> Option<OperationId> {
        self.inner.read().entries.keys().next_back().copied()
    }

    /// Number of recorded entries, compacted ones included
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

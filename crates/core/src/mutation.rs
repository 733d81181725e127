//! Mutation requests
//!
//! An `EntityMutation` targets one entity and carries exactly one
//! `Mutation` variant (the wire `oneof`). Structural validation happens here,
//! before anything reaches the mutation log; state-dependent checks (CAS,
//! existence) happen in the trait index under the entity's write lock.

use crate::entity::{Entity, Trait};
use crate::error::{Error, Result};
use crate::types::{EntityId, OperationId, TraitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Batch of mutations submitted together
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Mutations, applied in order
    pub mutations: Vec<EntityMutation>,
    /// Wait for the mutations to be indexed before returning
    #[serde(default)]
    pub wait_indexed: bool,
    /// Return the resulting entities
    #[serde(default)]
    pub return_entities: bool,
}

impl MutationRequest {
    /// Request with a single mutation
    pub fn single(mutation: EntityMutation) -> Self {
        MutationRequest {
            mutations: vec![mutation],
            ..Default::default()
        }
    }

    /// Builder: ask for the resulting entities
    pub fn returning_entities(mut self) -> Self {
        self.return_entities = true;
        self
    }
}

/// Outcome of a mutation request
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MutationResult {
    /// One operation id per applied mutation, in request order
    pub operation_ids: Vec<OperationId>,
    /// Resulting entities, when requested
    pub entities: Vec<Entity>,
}

/// Mutation of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMutation {
    /// Target entity
    pub entity_id: EntityId,
    /// What to do
    pub mutation: Mutation,
}

/// The mutation variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Upsert a trait
    PutTrait(PutTraitMutation),
    /// Remove a trait
    DeleteTrait(DeleteTraitMutation),
    /// Tombstone the whole entity
    DeleteEntity(DeleteEntityMutation),
    /// Partial update under a field mask, optionally CAS-guarded
    UpdateTrait(UpdateTraitMutation),
    /// Replace a span of operations on a trait by one consolidated state
    CompactTrait(CompactTraitMutation),
    /// Harness-only mutation
    Test(TestMutation),
}

/// Upsert a trait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutTraitMutation {
    /// Trait to write
    pub r#trait: Trait,
}

/// Remove a trait by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTraitMutation {
    /// Trait to remove
    pub trait_id: TraitId,
}

/// Tombstone an entity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeleteEntityMutation {}

/// Partial update of a trait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTraitMutation {
    /// Trait to update
    pub trait_id: TraitId,
    /// New values; only masked fields are taken
    pub r#trait: Trait,
    /// Field names to update; empty means all fields
    #[serde(default)]
    pub field_mask: Vec<String>,
    /// Apply only if the trait's last operation id equals this one
    #[serde(default)]
    pub if_last_operation_id: Option<OperationId>,
}

/// One entry of a compaction manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactedOperation {
    /// Operation folded into the compaction
    pub operation_id: OperationId,
}

/// Consolidate prior operations on a trait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactTraitMutation {
    /// Operations replaced by this compaction
    pub compacted_operations: Vec<CompactedOperation>,
    /// Consolidated trait state
    pub r#trait: Trait,
}

/// Harness-only mutation echoing a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestMutation {
    /// Whether the mutation should succeed
    pub success: bool,
}

impl EntityMutation {
    /// Upsert `trait` on `entity_id`
    pub fn put_trait(entity_id: impl Into<EntityId>, r#trait: Trait) -> Self {
        EntityMutation {
            entity_id: entity_id.into(),
            mutation: Mutation::PutTrait(PutTraitMutation { r#trait }),
        }
    }

    /// Remove `trait_id` from `entity_id`
    pub fn delete_trait(entity_id: impl Into<EntityId>, trait_id: impl Into<TraitId>) -> Self {
        EntityMutation {
            entity_id: entity_id.into(),
            mutation: Mutation::DeleteTrait(DeleteTraitMutation {
                trait_id: trait_id.into(),
            }),
        }
    }

    /// Tombstone `entity_id`
    pub fn delete_entity(entity_id: impl Into<EntityId>) -> Self {
        EntityMutation {
            entity_id: entity_id.into(),
            mutation: Mutation::DeleteEntity(DeleteEntityMutation {}),
        }
    }

    /// Update `trait_id` under `field_mask`, optionally guarded by `if_last_operation_id`
    pub fn update_trait(
        entity_id: impl Into<EntityId>,
        trait_id: impl Into<TraitId>,
        r#trait: Trait,
        field_mask: Vec<String>,
        if_last_operation_id: Option<OperationId>,
    ) -> Self {
        EntityMutation {
            entity_id: entity_id.into(),
            mutation: Mutation::UpdateTrait(UpdateTraitMutation {
                trait_id: trait_id.into(),
                r#trait,
                field_mask,
                if_last_operation_id,
            }),
        }
    }

    /// Compact `operation_ids` of `trait`'s id into `trait`
    pub fn compact_trait(
        entity_id: impl Into<EntityId>,
        operation_ids: &[OperationId],
        r#trait: Trait,
    ) -> Self {
        EntityMutation {
            entity_id: entity_id.into(),
            mutation: Mutation::CompactTrait(CompactTraitMutation {
                compacted_operations: operation_ids
                    .iter()
                    .map(|&operation_id| CompactedOperation { operation_id })
                    .collect(),
                r#trait,
            }),
        }
    }

    /// Harness-only mutation
    pub fn test(entity_id: impl Into<EntityId>, success: bool) -> Self {
        EntityMutation {
            entity_id: entity_id.into(),
            mutation: Mutation::Test(TestMutation { success }),
        }
    }

    /// Trait targeted by this mutation, if any
    pub fn trait_id(&self) -> Option<&TraitId> {
        self.mutation.trait_id()
    }

    /// Structural validation, independent of store state
    pub fn validate(&self) -> Result<()> {
        if self.entity_id.is_empty() {
            return Err(Error::validation("mutation has an empty entity id"));
        }
        self.mutation.validate()
    }
}

impl Mutation {
    /// Variant name, for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::PutTrait(_) => "put_trait",
            Mutation::DeleteTrait(_) => "delete_trait",
            Mutation::DeleteEntity(_) => "delete_entity",
            Mutation::UpdateTrait(_) => "update_trait",
            Mutation::CompactTrait(_) => "compact_trait",
            Mutation::Test(_) => "test",
        }
    }

    /// Trait targeted by this mutation, if any
    pub fn trait_id(&self) -> Option<&TraitId> {
        match self {
            Mutation::PutTrait(m) => Some(&m.r#trait.id),
            Mutation::DeleteTrait(m) => Some(&m.trait_id),
            Mutation::UpdateTrait(m) => Some(&m.trait_id),
            Mutation::CompactTrait(m) => Some(&m.r#trait.id),
            Mutation::DeleteEntity(_) | Mutation::Test(_) => None,
        }
    }

    /// Message type written by this mutation, if any
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Mutation::PutTrait(m) => m.r#trait.type_name(),
            Mutation::UpdateTrait(m) => m.r#trait.type_name(),
            Mutation::CompactTrait(m) => m.r#trait.type_name(),
            _ => None,
        }
    }

    /// Structural validation, independent of store state
    pub fn validate(&self) -> Result<()> {
        match self {
            Mutation::PutTrait(m) => {
                if m.r#trait.id.is_empty() {
                    return Err(Error::validation("put_trait requires a trait id"));
                }
                if m.r#trait.message.is_none() {
                    return Err(Error::validation("put_trait requires a trait message"));
                }
            }
            Mutation::DeleteTrait(m) => {
                if m.trait_id.is_empty() {
                    return Err(Error::validation("delete_trait requires a trait id"));
                }
            }
            Mutation::DeleteEntity(_) => {}
            Mutation::UpdateTrait(m) => {
                if m.trait_id.is_empty() {
                    return Err(Error::validation("update_trait requires a trait id"));
                }
                if !m.r#trait.id.is_empty() && m.r#trait.id != m.trait_id {
                    return Err(Error::validation(format!(
                        "update_trait targets {} but carries trait {}",
                        m.trait_id, m.r#trait.id
                    )));
                }
                if m.r#trait.message.is_none() {
                    return Err(Error::validation("update_trait requires a trait message"));
                }
                if m.if_last_operation_id == Some(0) {
                    return Err(Error::validation("if_last_operation_id cannot be 0"));
                }
                let mut seen = HashSet::new();
                for path in &m.field_mask {
                    if path.is_empty() {
                        return Err(Error::validation("field mask contains an empty path"));
                    }
                    if !seen.insert(path) {
                        return Err(Error::validation(format!(
                            "field mask repeats path {}",
                            path
                        )));
                    }
                }
            }
            Mutation::CompactTrait(m) => {
                if m.compacted_operations.is_empty() {
                    return Err(Error::validation(
                        "compact_trait requires at least one compacted operation",
                    ));
                }
                if m.r#trait.id.is_empty() {
                    return Err(Error::validation("compact_trait requires a trait id"));
                }
                if m.r#trait.message.is_none() {
                    return Err(Error::validation("compact_trait requires a trait message"));
                }
                let mut seen = HashSet::new();
                for op in &m.compacted_operations {
                    if !seen.insert(op.operation_id) {
                        return Err(Error::validation(format!(
                            "compact_trait lists operation {} twice",
                            op.operation_id
                        )));
                    }
                }
            }
            Mutation::Test(m) => {
                if !m.success {
                    return Err(Error::validation("test mutation requested failure"));
                }
            }
        }
        Ok(())
    }

    /// State of the targeted trait after this mutation
    ///
    /// `current` is the trait's state before the mutation. Returns `None` when
    /// the trait no longer exists afterwards. Dates the caller did not supply
    /// are filled from `now`. Shared by the trait index (live apply) and the
    /// mutation log (replay), so both observe the same fold.
    pub fn fold_trait(&self, current: Option<&Trait>, now: DateTime<Utc>) -> Option<Trait> {
        match self {
            Mutation::PutTrait(m) => {
                let mut next = m.r#trait.clone();
                next.creation_date = next
                    .creation_date
                    .or_else(|| current.and_then(|c| c.creation_date))
                    .or(Some(now));
                if current.is_some() {
                    next.modification_date = next.modification_date.or(Some(now));
                }
                Some(next)
            }
            Mutation::UpdateTrait(m) => {
                let mut next = current?.clone();
                if let (Some(base), Some(update)) = (next.message.as_mut(), m.r#trait.message.as_ref())
                {
                    base.apply_mask(update, &m.field_mask);
                }
                next.modification_date = m.r#trait.modification_date.or(Some(now));
                Some(next)
            }
            Mutation::CompactTrait(m) => {
                let mut next = m.r#trait.clone();
                next.creation_date = next
                    .creation_date
                    .or_else(|| current.and_then(|c| c.creation_date))
                    .or(Some(now));
                next.modification_date = next
                    .modification_date
                    .or_else(|| current.and_then(|c| c.modification_date));
                Some(next)
            }
            Mutation::DeleteTrait(_) | Mutation::DeleteEntity(_) => None,
            Mutation::Test(_) => current.cloned(),
        }
    }
}

//! Materialized entity state
//!
//! An `EntityRecord` is the fold of every applied operation of one entity.
//! Deleted traits and deleted entities are kept as tombstones holding their
//! last state, so `include_deleted` queries and operation lookups can still
//! address them.

use exocore_core::{Entity, EntityId, OperationId, Trait, TraitId};
use std::collections::BTreeMap;

/// Materialized state of one trait
#[derive(Debug, Clone, PartialEq)]
pub struct TraitRecord {
    /// Last state of the trait
    pub r#trait: Trait,
    /// Last operation applied to this trait
    pub last_operation_id: OperationId,
    /// Operation that deleted the trait, if tombstoned
    pub deleted_by: Option<OperationId>,
}

impl TraitRecord {
    /// Whether the trait is live
    pub fn is_live(&self) -> bool {
        self.deleted_by.is_none()
    }

    /// Message type of the trait
    pub fn type_name(&self) -> Option<&str> {
        self.r#trait.type_name()
    }
}

/// Materialized state of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Entity id
    pub id: EntityId,
    /// Traits by id, tombstones included
    pub traits: BTreeMap<TraitId, TraitRecord>,
    /// Last operation applied to the entity
    pub last_operation_id: OperationId,
    /// Every operation applied to the entity, in apply order
    pub operations: Vec<OperationId>,
    /// Operation that deleted the entity, if tombstoned
    pub deleted_by: Option<OperationId>,
}

impl EntityRecord {
    /// Create an empty record
    pub fn new(id: EntityId) -> Self {
        EntityRecord {
            id,
            traits: BTreeMap::new(),
            last_operation_id: 0,
            operations: Vec::new(),
            deleted_by: None,
        }
    }

    /// Whether the entity is tombstoned
    pub fn is_deleted(&self) -> bool {
        self.deleted_by.is_some()
    }

    /// Live trait by id
    pub fn live_trait(&self, trait_id: &TraitId) -> Option<&TraitRecord> {
        self.traits.get(trait_id).filter(|t| t.is_live())
    }

    /// Trait records visible under `include_deleted`
    pub fn visible_traits(&self, include_deleted: bool) -> impl Iterator<Item = &TraitRecord> {
        self.traits
            .values()
            .filter(move |t| include_deleted || t.is_live())
    }

    /// Whether the entity shows up at all under `include_deleted`
    pub fn is_visible(&self, include_deleted: bool) -> bool {
        if include_deleted {
            return !self.traits.is_empty();
        }
        !self.is_deleted() && self.traits.values().any(|t| t.is_live())
    }

    /// Entity as returned by queries
    ///
    /// A deleted entity is shown with the last state of all its traits.
    pub fn to_entity(&self, include_deleted: bool) -> Entity {
        let traits = self
            .visible_traits(include_deleted)
            .map(|t| t.r#trait.clone())
            .collect();
        Entity::with_traits(self.id.clone(), traits)
    }

    /// Message types of the visible traits
    pub fn type_names(&self, include_deleted: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .visible_traits(include_deleted)
            .filter_map(|t| t.type_name().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

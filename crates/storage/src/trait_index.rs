//! Trait index
//!
//! Materialized entity → traits mapping plus the secondary indexes derived
//! from it. The index is updated synchronously by `apply`, under the entity
//! write lock held by the caller, and read concurrently by queries.
//!
//! # Lock order
//!
//! schemas → entities → secondary indexes. Readers never hold an entity
//! entry while waiting on a secondary index.

use crate::record::{EntityRecord, TraitRecord};
use crate::secondary::SecondaryIndexes;
use chrono::Utc;
use dashmap::DashMap;
use exocore_concurrency::check_last_operation;
use exocore_core::{
    EntityId, EntityMutation, Error, FieldPredicateValue, Mutation, OperationId, Operator,
    Reference, Result, SchemaRegistry, Trait, TraitId, TraitRef, TraitSchema,
};
use exocore_search::BM25LiteScorer;
use parking_lot::{RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Effect of an applied mutation, used to scope watch re-evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    /// Mutated entity
    pub entity_id: EntityId,
    /// Operation id of the mutation
    pub operation_id: OperationId,
    /// Message types whose traits were added, changed or removed
    pub trait_types: Vec<String>,
    /// Whether the entity was tombstoned
    pub entity_deleted: bool,
}

/// Materialized entities and their secondary indexes
#[derive(Debug)]
pub struct TraitIndex {
    schemas: RwLock<SchemaRegistry>,
    entities: DashMap<EntityId, EntityRecord>,
    live: SecondaryIndexes,
    tombstones: SecondaryIndexes,
    scorer: BM25LiteScorer,
    available: AtomicBool,
}

impl Default for TraitIndex {
    fn default() -> Self {
        Self::new(SchemaRegistry::default())
    }
}

impl TraitIndex {
    /// Create an empty index
    pub fn new(schemas: SchemaRegistry) -> Self {
        TraitIndex {
            schemas: RwLock::new(schemas),
            entities: DashMap::new(),
            live: SecondaryIndexes::default(),
            tombstones: SecondaryIndexes::default(),
            scorer: BM25LiteScorer::default(),
            available: AtomicBool::new(true),
        }
    }

    // ========================================================================
    // Availability
    // ========================================================================

    /// Stop serving requests; every later call fails with `IndexUnavailable`
    pub fn close(&self) {
        self.available.store(false, Ordering::Release);
    }

    /// Fail if the index was closed
    pub fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::IndexUnavailable("trait index is closed".to_string()))
        }
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    /// Registered schemas
    ///
    /// Do not hold the guard across another call into the index.
    pub fn schemas(&self) -> RwLockReadGuard<'_, SchemaRegistry> {
        self.schemas.read()
    }

    /// Register (or replace) a schema and reindex the traits of its type
    pub fn register_schema(&self, schema: TraitSchema) {
        let mut schemas = self.schemas.write();
        let type_name = schema.type_name.clone();

        let mut reindex = Vec::new();
        for (population, deleted) in [(&self.live, false), (&self.tombstones, true)] {
            for trait_ref in population.types.get(&type_name) {
                let found = self.entities.get(&trait_ref.entity_id).and_then(|record| {
                    record
                        .traits
                        .get(&trait_ref.trait_id)
                        .map(|t| t.r#trait.clone())
                });
                if let Some(r#trait) = found {
                    population.remove(&trait_ref, &r#trait, &schemas);
                    reindex.push((trait_ref, r#trait, deleted));
                }
            }
        }

        schemas.register(schema);
        for (trait_ref, r#trait, deleted) in &reindex {
            self.population(*deleted).insert(trait_ref, r#trait, &schemas);
        }
        tracing::info!(
            target: "exocore::index",
            type_name = %type_name,
            reindexed = reindex.len(),
            "Registered schema"
        );
    }

    fn population(&self, deleted: bool) -> &SecondaryIndexes {
        if deleted {
            &self.tombstones
        } else {
            &self.live
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Check a mutation against the current state without applying it
    ///
    /// Covers structural validation, existence of the targeted entity and
    /// trait, message type stability, field masks against registered
    /// schemas, and the `if_last_operation_id` check.
    pub fn validate(&self, mutation: &EntityMutation) -> Result<()> {
        self.check_available()?;
        mutation.validate()?;

        let schemas = self.schemas.read();
        let entity_id = &mutation.entity_id;
        let record = self.entities.get(entity_id);
        let deleted = record.as_ref().map_or(false, |r| r.is_deleted());
        let live_trait = |trait_id: &TraitId| -> Result<TraitRecord> {
            record
                .as_ref()
                .and_then(|r| r.live_trait(trait_id).cloned())
                .ok_or_else(|| {
                    Error::validation(format!("unknown trait {}/{}", entity_id, trait_id))
                })
        };

        match &mutation.mutation {
            Mutation::PutTrait(_) => {
                if deleted {
                    return Err(Error::validation(format!(
                        "entity {} is deleted",
                        entity_id
                    )));
                }
            }
            Mutation::DeleteTrait(m) => {
                live_trait(&m.trait_id)?;
            }
            Mutation::DeleteEntity(_) => {
                if record.is_none() {
                    return Err(Error::validation(format!("unknown entity {}", entity_id)));
                }
                if deleted {
                    return Err(Error::validation(format!(
                        "entity {} is already deleted",
                        entity_id
                    )));
                }
            }
            Mutation::UpdateTrait(m) => {
                let current = live_trait(&m.trait_id)?;
                let current_type = current.type_name().unwrap_or_default();
                let new_type = m.r#trait.type_name().unwrap_or_default();
                if current_type != new_type {
                    return Err(Error::validation(format!(
                        "update of {}/{} changes message type from {} to {}",
                        entity_id, m.trait_id, current_type, new_type
                    )));
                }
                if let Some(schema) = schemas.get(new_type) {
                    if let Some(path) = m.field_mask.iter().find(|p| schema.field(p).is_none()) {
                        return Err(Error::validation(format!(
                            "field mask path {} is not a field of {}",
                            path, new_type
                        )));
                    }
                }
                check_last_operation(
                    entity_id,
                    &m.trait_id,
                    m.if_last_operation_id,
                    current.last_operation_id,
                )?;
            }
            Mutation::CompactTrait(m) => {
                live_trait(&m.r#trait.id)?;
            }
            Mutation::Test(_) => {}
        }
        Ok(())
    }

    /// Apply a validated mutation under `operation_id`
    ///
    /// The caller holds the entity write lock and has called `validate`
    /// under the same lock.
    pub fn apply(
        &self,
        mutation: &EntityMutation,
        operation_id: OperationId,
    ) -> Result<AppliedMutation> {
        self.check_available()?;
        let now = Utc::now();
        let schemas = self.schemas.read();
        let entity_id = &mutation.entity_id;

        if matches!(mutation.mutation, Mutation::Test(_)) && !self.entities.contains_key(entity_id)
        {
            return Ok(AppliedMutation {
                entity_id: entity_id.clone(),
                operation_id,
                trait_types: Vec::new(),
                entity_deleted: false,
            });
        }

        let mut record = self
            .entities
            .entry(entity_id.clone())
            .or_insert_with(|| EntityRecord::new(entity_id.clone()));
        let mut trait_types = Vec::new();
        let mut entity_deleted = false;

        match &mutation.mutation {
            Mutation::PutTrait(_) | Mutation::UpdateTrait(_) | Mutation::CompactTrait(_) => {
                let trait_id = mutation
                    .trait_id()
                    .cloned()
                    .ok_or_else(|| Error::validation("mutation targets no trait"))?;
                let trait_ref = TraitRef::new(entity_id.clone(), trait_id.clone());
                let previous = record.traits.get(&trait_id).cloned();
                let current = previous.as_ref().filter(|p| p.is_live());

                if !matches!(mutation.mutation, Mutation::PutTrait(_)) && current.is_none() {
                    return Err(Error::validation(format!(
                        "unknown trait {}/{}",
                        entity_id, trait_id
                    )));
                }

                let next = mutation
                    .mutation
                    .fold_trait(current.map(|c| &c.r#trait), now)
                    .ok_or_else(|| Error::validation("mutation produced no trait"))?;

                if let Some(previous) = &previous {
                    self.population(!previous.is_live())
                        .remove(&trait_ref, &previous.r#trait, &schemas);
                    trait_types.extend(previous.type_name().map(str::to_string));
                }
                self.live.insert(&trait_ref, &next, &schemas);
                trait_types.extend(next.type_name().map(str::to_string));

                record.traits.insert(
                    trait_id,
                    TraitRecord {
                        r#trait: next,
                        last_operation_id: operation_id,
                        deleted_by: None,
                    },
                );
            }
            Mutation::DeleteTrait(m) => {
                let trait_ref = TraitRef::new(entity_id.clone(), m.trait_id.clone());
                let Some(target) = record.traits.get_mut(&m.trait_id).filter(|t| t.is_live())
                else {
                    return Err(Error::validation(format!(
                        "unknown trait {}/{}",
                        entity_id, m.trait_id
                    )));
                };
                self.live.remove(&trait_ref, &target.r#trait, &schemas);
                self.tombstones.insert(&trait_ref, &target.r#trait, &schemas);
                target.deleted_by = Some(operation_id);
                target.last_operation_id = operation_id;
                trait_types.extend(target.type_name().map(str::to_string));
            }
            Mutation::DeleteEntity(_) => {
                for (trait_id, target) in record.traits.iter_mut().filter(|(_, t)| t.is_live()) {
                    let trait_ref = TraitRef::new(entity_id.clone(), trait_id.clone());
                    self.live.remove(&trait_ref, &target.r#trait, &schemas);
                    self.tombstones.insert(&trait_ref, &target.r#trait, &schemas);
                    target.deleted_by = Some(operation_id);
                    target.last_operation_id = operation_id;
                    trait_types.extend(target.type_name().map(str::to_string));
                }
                record.deleted_by = Some(operation_id);
                entity_deleted = true;
            }
            Mutation::Test(_) => {}
        }

        record.operations.push(operation_id);
        record.last_operation_id = record.last_operation_id.max(operation_id);
        trait_types.sort();
        trait_types.dedup();

        tracing::debug!(
            target: "exocore::index",
            entity_id = %entity_id,
            operation_id,
            kind = mutation.mutation.kind(),
            "Applied mutation"
        );

        Ok(AppliedMutation {
            entity_id: entity_id.clone(),
            operation_id,
            trait_types,
            entity_deleted,
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Snapshot of an entity record, tombstoned or not
    pub fn record(&self, entity_id: &EntityId) -> Option<EntityRecord> {
        self.entities.get(entity_id).map(|r| r.clone())
    }

    /// Last operation applied to a trait
    pub fn trait_last_operation(&self, entity_id: &EntityId, trait_id: &TraitId) -> Option<OperationId> {
        self.entities
            .get(entity_id)
            .and_then(|r| r.traits.get(trait_id).map(|t| t.last_operation_id))
    }

    /// Ids of every entity visible under `include_deleted`
    pub fn entity_ids(&self, include_deleted: bool) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|r| r.is_visible(include_deleted))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Traits of a message type
    pub fn traits_of_type(&self, type_name: &str, include_deleted: bool) -> Vec<TraitRef> {
        let mut refs = self.live.types.get(type_name);
        if include_deleted {
            refs.extend(self.tombstones.types.get(type_name));
        }
        refs
    }

    /// Traits whose indexed field satisfies `field <operator> value`
    ///
    /// Only meaningful for fields with a value index; other fields are never
    /// recorded and yield nothing.
    pub fn field_lookup(
        &self,
        type_name: &str,
        field: &str,
        operator: Operator,
        value: &FieldPredicateValue,
        include_deleted: bool,
    ) -> Vec<TraitRef> {
        let mut refs = self.live.values.lookup(type_name, field, operator, value);
        if include_deleted {
            refs.extend(self.tombstones.values.lookup(type_name, field, operator, value));
        }
        refs
    }

    /// Traits holding a reference to `reference` in `field`
    pub fn references_to(
        &self,
        reference: &Reference,
        field: &str,
        include_deleted: bool,
    ) -> Vec<TraitRef> {
        let mut refs = self.live.references.lookup(reference, field);
        if include_deleted {
            refs.extend(self.tombstones.references.lookup(reference, field));
        }
        refs
    }

    /// Text-match traits, scored with BM25-lite
    pub fn search_text(&self, query: &str, include_deleted: bool) -> FxHashMap<TraitRef, f32> {
        let mut scores = self.live.search_text(query, &self.scorer);
        if include_deleted {
            for (trait_ref, score) in self.tombstones.search_text(query, &self.scorer) {
                scores.entry(trait_ref).or_insert(score);
            }
        }
        scores
    }

    /// Trait state by address, tombstoned traits included
    pub fn get_trait(&self, trait_ref: &TraitRef) -> Option<Trait> {
        self.entities
            .get(&trait_ref.entity_id)
            .and_then(|r| r.traits.get(&trait_ref.trait_id).map(|t| t.r#trait.clone()))
    }

    /// Number of entity records, tombstones included
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity was ever mutated
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exocore_core::{FieldOptions, FieldValue, TraitMessage};

    const TYPE: &str = "exocore.test.TestMessage";

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::new().with_schema(
            TraitSchema::new(TYPE)
                .with_field("string1", FieldOptions::text())
                .with_field("uint1", FieldOptions::sorted())
                .with_field("ref1", FieldOptions::default()),
        )
    }

    fn msg(s: &str) -> TraitMessage {
        TraitMessage::new(TYPE).with_field("string1", s)
    }

    fn run(index: &TraitIndex, m: EntityMutation, op: OperationId) -> Result<AppliedMutation> {
        index.validate(&m)?;
        index.apply(&m, op)
    }

    #[test]
    fn test_put_then_lookup() {
        let index = TraitIndex::new(schemas());
        let applied = run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("hello"))), 10)
            .unwrap();
        assert_eq!(applied.trait_types, vec![TYPE.to_string()]);

        let record = index.record(&"e1".into()).unwrap();
        assert_eq!(record.last_operation_id, 10);
        let t = &record.traits[&TraitId::new("t1")];
        assert!(t.r#trait.creation_date.is_some());
        assert!(t.r#trait.modification_date.is_none());
        assert_eq!(index.traits_of_type(TYPE, false).len(), 1);
        assert_eq!(index.search_text("hello", false).len(), 1);
    }

    #[test]
    fn test_cas_update() {
        let index = TraitIndex::new(schemas());
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("hello"))), 10).unwrap();

        let stale = EntityMutation::update_trait("e1", "t1", Trait::new("t1", msg("x")), vec![], Some(9));
        assert!(index.validate(&stale).unwrap_err().is_conflict());

        let ok = EntityMutation::update_trait("e1", "t1", Trait::new("t1", msg("world")), vec![], Some(10));
        run(&index, ok.clone(), 11).unwrap();
        assert_eq!(index.trait_last_operation(&"e1".into(), &"t1".into()), Some(11));
        assert!(index.validate(&ok).unwrap_err().is_conflict());

        // text index follows the update
        assert!(index.search_text("hello", false).is_empty());
        assert_eq!(index.search_text("world", false).len(), 1);
    }

    #[test]
    fn test_update_rejections() {
        let index = TraitIndex::new(schemas());
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("a"))), 1).unwrap();

        let unknown = EntityMutation::update_trait("e1", "t9", Trait::new("", msg("b")), vec![], None);
        assert!(matches!(index.validate(&unknown), Err(Error::Validation(_))));

        let other_type = EntityMutation::update_trait(
            "e1",
            "t1",
            Trait::new("", TraitMessage::new("exocore.test.Other")),
            vec![],
            None,
        );
        assert!(matches!(index.validate(&other_type), Err(Error::Validation(_))));

        let bad_mask =
            EntityMutation::update_trait("e1", "t1", Trait::new("", msg("b")), vec!["nope".into()], None);
        assert!(matches!(index.validate(&bad_mask), Err(Error::Validation(_))));
    }

    #[test]
    fn test_masked_update_keeps_other_fields() {
        let index = TraitIndex::new(schemas());
        let full = msg("a").with_field("uint1", 5u64);
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", full)), 1).unwrap();

        let update = TraitMessage::new(TYPE).with_field("uint1", 7u64);
        run(
            &index,
            EntityMutation::update_trait("e1", "t1", Trait::new("", update), vec!["uint1".into()], None),
            2,
        )
        .unwrap();

        let t = index.get_trait(&TraitRef::new("e1", "t1")).unwrap();
        let message = t.message.unwrap();
        assert_eq!(message.get("string1"), Some(&FieldValue::from("a")));
        assert_eq!(message.get("uint1"), Some(&FieldValue::Uint64(7)));
        assert!(t.modification_date.is_some());
        assert_eq!(
            index
                .field_lookup(TYPE, "uint1", Operator::Equal, &FieldPredicateValue::Uint64(7), false)
                .len(),
            1
        );
        assert!(index
            .field_lookup(TYPE, "uint1", Operator::Equal, &FieldPredicateValue::Uint64(5), false)
            .is_empty());
    }

    #[test]
    fn test_delete_trait_moves_to_tombstones() {
        let index = TraitIndex::new(schemas());
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("hello"))), 1).unwrap();
        run(&index, EntityMutation::put_trait("e1", Trait::new("t2", msg("other"))), 2).unwrap();
        run(&index, EntityMutation::delete_trait("e1", "t1"), 3).unwrap();

        assert_eq!(index.traits_of_type(TYPE, false).len(), 1);
        assert_eq!(index.traits_of_type(TYPE, true).len(), 2);
        assert!(index.search_text("hello", false).is_empty());
        assert_eq!(index.search_text("hello", true).len(), 1);

        // deleting again is unknown
        assert!(index.validate(&EntityMutation::delete_trait("e1", "t1")).is_err());

        // a new put resurrects the trait id
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("again"))), 4).unwrap();
        assert_eq!(index.traits_of_type(TYPE, false).len(), 2);
        assert_eq!(index.traits_of_type(TYPE, true).len(), 2);
    }

    #[test]
    fn test_delete_entity_tombstones() {
        let index = TraitIndex::new(schemas());
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("hello"))), 1).unwrap();
        let applied = run(&index, EntityMutation::delete_entity("e1"), 2).unwrap();
        assert!(applied.entity_deleted);
        assert_eq!(applied.trait_types, vec![TYPE.to_string()]);

        assert!(index.entity_ids(false).is_empty());
        assert_eq!(index.entity_ids(true), vec![EntityId::new("e1")]);
        assert_eq!(index.record(&"e1".into()).unwrap().operations, vec![1, 2]);

        let put = EntityMutation::put_trait("e1", Trait::new("t2", msg("x")));
        assert!(matches!(index.validate(&put), Err(Error::Validation(_))));
        assert!(index.validate(&EntityMutation::delete_entity("e1")).is_err());
        assert!(index.validate(&EntityMutation::delete_entity("nobody")).is_err());
    }

    #[test]
    fn test_reference_index() {
        let index = TraitIndex::new(schemas());
        let m = msg("a").with_field("ref1", FieldValue::Reference(Reference::entity("target")));
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", m)), 1).unwrap();

        assert_eq!(
            index.references_to(&Reference::entity("target"), "", false),
            vec![TraitRef::new("e1", "t1")]
        );
        run(&index, EntityMutation::delete_trait("e1", "t1"), 2).unwrap();
        assert!(index.references_to(&Reference::entity("target"), "", false).is_empty());
        assert_eq!(index.references_to(&Reference::entity("target"), "", true).len(), 1);
    }

    #[test]
    fn test_register_schema_reindexes() {
        let index = TraitIndex::default();
        run(&index, EntityMutation::put_trait("e1", Trait::new("t1", msg("hello"))), 1).unwrap();
        assert!(index.search_text("hello", false).is_empty());

        index.register_schema(TraitSchema::new(TYPE).with_field("string1", FieldOptions::text()));
        assert_eq!(index.search_text("hello", false).len(), 1);
    }

    #[test]
    fn test_test_mutation_is_noop() {
        let index = TraitIndex::new(schemas());
        let applied = run(&index, EntityMutation::test("e1", true), 1).unwrap();
        assert!(applied.trait_types.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_closed_index_is_unavailable() {
        let index = TraitIndex::new(schemas());
        index.close();
        let err = index
            .validate(&EntityMutation::put_trait("e1", Trait::new("t1", msg("a"))))
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

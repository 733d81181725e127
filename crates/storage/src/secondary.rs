//! Secondary indexes over trait content
//!
//! This module provides the lookup structures the query planner narrows
//! candidates with:
//! - TypeIndex: message type → traits
//! - ValueIndex: (type, field) → ordered field values → traits
//! - ReferenceIndex: target entity → referencing trait fields
//! - text: inverted index over text-flagged fields
//!
//! The trait index keeps two instances, one for live traits and one for
//! tombstoned traits, so `include_deleted` lookups never filter live results.

use crate::key::IndexKey;
use dashmap::DashMap;
use exocore_core::{
    EntityId, FieldPredicateValue, Operator, Reference, SchemaRegistry, Trait, TraitRef,
};
use exocore_search::{tokenize_unique, InvertedIndex, Scorer};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::ops::Bound;

// ============================================================================
// TypeIndex
// ============================================================================

/// Secondary index: message type → traits
#[derive(Debug, Default)]
pub struct TypeIndex {
    index: DashMap<String, FxHashSet<TraitRef>>,
}

impl TypeIndex {
    /// Add a trait under its type
    pub fn insert(&self, type_name: &str, trait_ref: TraitRef) {
        self.index
            .entry(type_name.to_string())
            .or_default()
            .insert(trait_ref);
    }

    /// Remove a trait from its type, dropping empty sets
    pub fn remove(&self, type_name: &str, trait_ref: &TraitRef) {
        let empty = match self.index.get_mut(type_name) {
            Some(mut refs) => {
                refs.remove(trait_ref);
                refs.is_empty()
            }
            None => false,
        };
        if empty {
            self.index.remove_if(type_name, |_, refs| refs.is_empty());
        }
    }

    /// Traits of a type
    pub fn get(&self, type_name: &str) -> Vec<TraitRef> {
        self.index
            .get(type_name)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of types in the index
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// ============================================================================
// ValueIndex
// ============================================================================

type FieldKey = (String, String);

/// Secondary index: (type, field) → ordered values → traits
///
/// Only fields flagged `indexed` or `sorted` in the schema are recorded.
#[derive(Debug, Default)]
pub struct ValueIndex {
    fields: RwLock<FxHashMap<FieldKey, BTreeMap<IndexKey, FxHashSet<TraitRef>>>>,
}

impl ValueIndex {
    /// Record a field value of a trait
    pub fn insert(&self, type_name: &str, field: &str, key: IndexKey, trait_ref: TraitRef) {
        self.fields
            .write()
            .entry((type_name.to_string(), field.to_string()))
            .or_default()
            .entry(key)
            .or_default()
            .insert(trait_ref);
    }

    /// Forget a field value of a trait
    pub fn remove(&self, type_name: &str, field: &str, key: &IndexKey, trait_ref: &TraitRef) {
        let mut fields = self.fields.write();
        let field_key = (type_name.to_string(), field.to_string());
        if let Some(values) = fields.get_mut(&field_key) {
            if let Some(refs) = values.get_mut(key) {
                refs.remove(trait_ref);
                if refs.is_empty() {
                    values.remove(key);
                }
            }
            if values.is_empty() {
                fields.remove(&field_key);
            }
        }
    }

    /// Traits whose field satisfies `field <operator> value`
    ///
    /// Scans only keys of the predicate value's kind.
    pub fn lookup(
        &self,
        type_name: &str,
        field: &str,
        operator: Operator,
        value: &FieldPredicateValue,
    ) -> Vec<TraitRef> {
        let fields = self.fields.read();
        let Some(values) = fields.get(&(type_name.to_string(), field.to_string())) else {
            return Vec::new();
        };
        let probe = IndexKey::from_predicate(value);

        let mut out = Vec::new();
        let mut collect = |refs: &FxHashSet<TraitRef>| out.extend(refs.iter().cloned());
        match operator {
            Operator::Equal => {
                if let Some(refs) = values.get(&probe) {
                    collect(refs);
                }
            }
            Operator::Gt | Operator::Gte => {
                let lower = if operator == Operator::Gt {
                    Bound::Excluded(&probe)
                } else {
                    Bound::Included(&probe)
                };
                values
                    .range((lower, Bound::Unbounded))
                    .take_while(|(k, _)| k.same_kind(&probe))
                    .for_each(|(_, refs)| collect(refs));
            }
            Operator::Lt | Operator::Lte => {
                let upper = if operator == Operator::Lt {
                    Bound::Excluded(&probe)
                } else {
                    Bound::Included(&probe)
                };
                values
                    .range((Bound::Unbounded, upper))
                    .rev()
                    .take_while(|(k, _)| k.same_kind(&probe))
                    .for_each(|(_, refs)| collect(refs));
            }
        }
        out
    }

    /// Number of indexed (type, field) pairs
    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}

// ============================================================================
// ReferenceIndex
// ============================================================================

/// One reference-valued field pointing at an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceEdge {
    /// Trait holding the field
    pub source: TraitRef,
    /// Field name
    pub field: String,
    /// Referenced entity and trait
    pub target: Reference,
}

/// Secondary index: target entity → referencing fields
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    index: DashMap<EntityId, FxHashSet<ReferenceEdge>>,
}

impl ReferenceIndex {
    /// Record an edge
    pub fn insert(&self, edge: ReferenceEdge) {
        self.index
            .entry(edge.target.entity_id.clone())
            .or_default()
            .insert(edge);
    }

    /// Forget an edge
    pub fn remove(&self, edge: &ReferenceEdge) {
        let empty = match self.index.get_mut(&edge.target.entity_id) {
            Some(mut edges) => {
                edges.remove(edge);
                edges.is_empty()
            }
            None => false,
        };
        if empty {
            self.index
                .remove_if(&edge.target.entity_id, |_, edges| edges.is_empty());
        }
    }

    /// Traits referencing `reference` through `field`
    ///
    /// An empty trait id in `reference` accepts any target trait; an empty
    /// `field` accepts any field.
    pub fn lookup(&self, reference: &Reference, field: &str) -> Vec<TraitRef> {
        let Some(edges) = self.index.get(&reference.entity_id) else {
            return Vec::new();
        };
        let mut out: Vec<TraitRef> = edges
            .iter()
            .filter(|e| reference.matches(&e.target) && (field.is_empty() || e.field == field))
            .map(|e| e.source.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

// ============================================================================
// SecondaryIndexes
// ============================================================================

/// All secondary indexes of one trait population
#[derive(Debug, Default)]
pub struct SecondaryIndexes {
    /// Type index
    pub types: TypeIndex,
    /// Field value index
    pub values: ValueIndex,
    /// Reference index
    pub references: ReferenceIndex,
    /// Text index
    pub text: InvertedIndex,
}

/// Text indexed for a trait: its text-flagged string fields, in field order
pub fn trait_text(r#trait: &Trait, schemas: &SchemaRegistry) -> Option<String> {
    let message = r#trait.message.as_ref()?;
    let schema = schemas.get(&message.type_name)?;
    let parts: Vec<&str> = schema
        .text_fields()
        .filter_map(|field| message.get(field).and_then(|v| v.as_str()))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn reference_edges(trait_ref: &TraitRef, r#trait: &Trait) -> Vec<ReferenceEdge> {
    r#trait
        .message
        .iter()
        .flat_map(|m| m.references())
        .map(|(field, target)| ReferenceEdge {
            source: trait_ref.clone(),
            field: field.to_string(),
            target: target.clone(),
        })
        .collect()
}

impl SecondaryIndexes {
    /// Index a trait
    pub fn insert(&self, trait_ref: &TraitRef, r#trait: &Trait, schemas: &SchemaRegistry) {
        let Some(message) = r#trait.message.as_ref() else {
            return;
        };
        self.types.insert(&message.type_name, trait_ref.clone());

        if let Some(schema) = schemas.get(&message.type_name) {
            for field in schema.value_indexed_fields() {
                if let Some(key) = message.get(field).and_then(IndexKey::from_field) {
                    self.values
                        .insert(&message.type_name, field, key, trait_ref.clone());
                }
            }
        }
        for edge in reference_edges(trait_ref, r#trait) {
            self.references.insert(edge);
        }
        if let Some(text) = trait_text(r#trait, schemas) {
            self.text.index_document(trait_ref, &text);
        }
    }

    /// Remove a trait previously indexed with the same schemas
    pub fn remove(&self, trait_ref: &TraitRef, r#trait: &Trait, schemas: &SchemaRegistry) {
        let Some(message) = r#trait.message.as_ref() else {
            return;
        };
        self.types.remove(&message.type_name, trait_ref);

        if let Some(schema) = schemas.get(&message.type_name) {
            for field in schema.value_indexed_fields() {
                if let Some(key) = message.get(field).and_then(IndexKey::from_field) {
                    self.values
                        .remove(&message.type_name, field, &key, trait_ref);
                }
            }
        }
        for edge in reference_edges(trait_ref, r#trait) {
            self.references.remove(&edge);
        }
        self.text.remove_document(trait_ref);
    }

    /// Score traits against a text query; a repeated query term counts once
    pub fn search_text(&self, query: &str, scorer: &dyn Scorer) -> FxHashMap<TraitRef, f32> {
        let terms = tokenize_unique(query);
        self.text.search(&terms, scorer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exocore_core::{FieldOptions, FieldValue, TraitMessage, TraitSchema};
    use exocore_search::BM25LiteScorer;

    const TYPE: &str = "exocore.test.TestMessage";

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::new().with_schema(
            TraitSchema::new(TYPE)
                .with_field("string1", FieldOptions::text())
                .with_field("uint1", FieldOptions::sorted())
                .with_field("string2", FieldOptions::indexed()),
        )
    }

    fn make(e: &str, s: &str, n: u64) -> (TraitRef, Trait) {
        let message = TraitMessage::new(TYPE)
            .with_field("string1", s)
            .with_field("string2", s)
            .with_field("uint1", n)
            .with_field("ref1", FieldValue::Reference(Reference::to_trait("target", "tt")));
        (TraitRef::new(e, "t1"), Trait::new("t1", message))
    }

    #[test]
    fn test_insert_populates_every_index() {
        let schemas = schemas();
        let idx = SecondaryIndexes::default();
        let (r, t) = make("e1", "hello world", 5);
        idx.insert(&r, &t, &schemas);

        assert_eq!(idx.types.get(TYPE), vec![r.clone()]);
        assert_eq!(
            idx.values
                .lookup(TYPE, "uint1", Operator::Equal, &FieldPredicateValue::Uint64(5)),
            vec![r.clone()]
        );
        assert_eq!(
            idx.references.lookup(&Reference::entity("target"), ""),
            vec![r.clone()]
        );
        assert!(idx.search_text("hello", &BM25LiteScorer::default()).contains_key(&r));
    }

    #[test]
    fn test_repeated_query_terms_count_once() {
        let schemas = schemas();
        let idx = SecondaryIndexes::default();
        let (r, t) = make("e1", "hello world", 5);
        idx.insert(&r, &t, &schemas);

        let scorer = BM25LiteScorer::default();
        let once = idx.search_text("hello", &scorer)[&r];
        let repeated = idx.search_text("hello HELLO hello", &scorer)[&r];
        assert_eq!(once, repeated);
    }

    #[test]
    fn test_remove_clears_every_index() {
        let schemas = schemas();
        let idx = SecondaryIndexes::default();
        let (r, t) = make("e1", "hello", 5);
        idx.insert(&r, &t, &schemas);
        idx.remove(&r, &t, &schemas);

        assert!(idx.types.is_empty());
        assert!(idx.values.is_empty());
        assert!(idx.references.lookup(&Reference::entity("target"), "").is_empty());
        assert_eq!(idx.text.total_docs(), 0);
    }

    #[test]
    fn test_value_range_lookup() {
        let schemas = schemas();
        let idx = SecondaryIndexes::default();
        for (i, e) in ["e1", "e2", "e3", "e4"].iter().enumerate() {
            let (r, t) = make(e, "x", i as u64 + 1);
            idx.insert(&r, &t, &schemas);
        }
        let ids = |op, v| {
            let mut out: Vec<String> = idx
                .values
                .lookup(TYPE, "uint1", op, &FieldPredicateValue::Int64(v))
                .into_iter()
                .map(|r| r.entity_id.to_string())
                .collect();
            out.sort();
            out
        };
        assert_eq!(ids(Operator::Gt, 2), vec!["e3", "e4"]);
        assert_eq!(ids(Operator::Gte, 2), vec!["e2", "e3", "e4"]);
        assert_eq!(ids(Operator::Lt, 2), vec!["e1"]);
        assert_eq!(ids(Operator::Lte, 2), vec!["e1", "e2"]);
        assert_eq!(ids(Operator::Equal, 9), Vec::<String>::new());
    }

    #[test]
    fn test_range_does_not_cross_kinds() {
        let schemas = schemas();
        let idx = SecondaryIndexes::default();
        let (r, t) = make("e1", "zzz", 1);
        idx.insert(&r, &t, &schemas);
        // string2 holds a string; an integer range never reaches it
        assert!(idx
            .values
            .lookup(TYPE, "string2", Operator::Gt, &FieldPredicateValue::Int64(0))
            .is_empty());
        assert_eq!(
            idx.values.lookup(
                TYPE,
                "string2",
                Operator::Gte,
                &FieldPredicateValue::String("a".into())
            ),
            vec![r]
        );
    }

    #[test]
    fn test_reference_lookup_filters() {
        let schemas = schemas();
        let idx = SecondaryIndexes::default();
        let (r, t) = make("e1", "x", 1);
        idx.insert(&r, &t, &schemas);

        assert_eq!(idx.references.lookup(&Reference::to_trait("target", "tt"), "ref1"), vec![r.clone()]);
        assert!(idx.references.lookup(&Reference::to_trait("target", "other"), "").is_empty());
        assert!(idx.references.lookup(&Reference::entity("target"), "ref2").is_empty());
        assert!(idx.references.lookup(&Reference::entity("nobody"), "").is_empty());
    }
}

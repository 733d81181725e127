//! Trait payload types
//!
//! This module defines:
//! - FieldValue: typed value of one message field
//! - TraitMessage: the typed payload of a trait (type name + named fields)
//!
//! The payload is opaque to the engine except for the fields the schema
//! registry declares indexed, sorted or text, and reference-valued fields.
//!
//! ## Type Rules
//!
//! - Different variants are never equal: `Int64(1) != Uint64(1)`
//! - Float equality follows IEEE-754: `NaN != NaN`
//! - Fields are kept in a `BTreeMap` so the canonical encoding is deterministic

use crate::types::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed value of a message field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 string
    String(String),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit unsigned integer
    Uint64(u64),
    /// 64-bit floating point
    Float(f64),
    /// Boolean
    Bool(bool),
    /// UTC timestamp
    Date(DateTime<Utc>),
    /// Pointer to another entity or trait
    Reference(Reference),
}

impl FieldValue {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::String(_) => "string",
            FieldValue::Int64(_) => "int64",
            FieldValue::Uint64(_) => "uint64",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
            FieldValue::Date(_) => "date",
            FieldValue::Reference(_) => "reference",
        }
    }

    /// Get as string slice if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the reference if this is a reference value
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            FieldValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Whether values of this type can be used as an ordering key
    pub fn is_sortable(&self) -> bool {
        matches!(
            self,
            FieldValue::Int64(_) | FieldValue::Uint64(_) | FieldValue::Float(_) | FieldValue::Date(_)
        )
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Uint64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Date(v)
    }
}

impl From<Reference> for FieldValue {
    fn from(v: Reference) -> Self {
        FieldValue::Reference(v)
    }
}

/// Typed trait payload
///
/// `type_name` plays the role of the `Any` type URL: it selects the schema
/// used to decide which fields are indexed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraitMessage {
    /// Fully qualified message type, e.g. `exocore.test.TestMessage`
    pub type_name: String,
    /// Field values by field name
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl TraitMessage {
    /// Create an empty message of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        TraitMessage {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder: set a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Set a field value, returning the previous one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// All reference-valued fields as `(field name, reference)`
    pub fn references(&self) -> impl Iterator<Item = (&str, &Reference)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| value.as_reference().map(|r| (name.as_str(), r)))
    }

    /// Merge `update` into this message under a field mask
    ///
    /// An empty mask replaces every field. Otherwise each masked field is
    /// copied from `update`, or removed when `update` does not carry it.
    pub fn apply_mask(&mut self, update: &TraitMessage, mask: &[String]) {
        if mask.is_empty() {
            self.fields = update.fields.clone();
            return;
        }
        for path in mask {
            match update.fields.get(path) {
                Some(value) => {
                    self.fields.insert(path.clone(), value.clone());
                }
                None => {
                    self.fields.remove(path);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> TraitMessage {
        TraitMessage::new("exocore.test.TestMessage")
            .with_field("string1", "hello")
            .with_field("uint1", 3u64)
    }

    #[test]
    fn test_different_types_never_equal() {
        assert_ne!(FieldValue::Int64(1), FieldValue::Uint64(1));
        assert_ne!(FieldValue::Float(1.0), FieldValue::Int64(1));
        assert_ne!(FieldValue::Float(f64::NAN), FieldValue::Float(f64::NAN));
    }

    #[test]
    fn test_sortable_types() {
        assert!(FieldValue::Uint64(1).is_sortable());
        assert!(FieldValue::Date(Utc::now()).is_sortable());
        assert!(!FieldValue::from("x").is_sortable());
        assert!(!FieldValue::Bool(true).is_sortable());
        assert!(!FieldValue::Reference(Reference::entity("e1")).is_sortable());
    }

    #[test]
    fn test_apply_empty_mask_replaces_all() {
        let mut msg = message();
        let update = TraitMessage::new("exocore.test.TestMessage").with_field("string1", "world");
        msg.apply_mask(&update, &[]);
        assert_eq!(msg.get("string1"), Some(&FieldValue::from("world")));
        assert!(msg.get("uint1").is_none());
    }

    #[test]
    fn test_apply_mask_copies_and_clears() {
        let mut msg = message().with_field("string2", "keep");
        let update = TraitMessage::new("exocore.test.TestMessage").with_field("string1", "world");
        msg.apply_mask(&update, &["string1".to_string(), "uint1".to_string()]);

        assert_eq!(msg.get("string1"), Some(&FieldValue::from("world")));
        assert!(msg.get("uint1").is_none());
        assert_eq!(msg.get("string2"), Some(&FieldValue::from("keep")));
    }

    #[test]
    fn test_references_iterator() {
        let msg = message()
            .with_field("ref1", Reference::to_trait("e2", "t2"))
            .with_field("ref2", Reference::entity("e3"));
        let refs: Vec<_> = msg.references().collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, "ref1");
        assert_eq!(refs[1].1.entity_id.as_str(), "e3");
    }

    #[test]
    fn test_canonical_json_is_field_ordered() {
        let a = TraitMessage::new("t").with_field("b", 1u64).with_field("a", 2u64);
        let b = TraitMessage::new("t").with_field("a", 2u64).with_field("b", 1u64);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}

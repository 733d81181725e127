//! Ordered keys of the field value index
//!
//! Field values and predicate values are normalized to `IndexKey` so index
//! range scans and the unindexed filter path agree on what matches:
//! - `Int64` and `Uint64` share the `Int` kind and compare numerically
//! - `Float` keys are stored as a total-order bit pattern
//! - values of different kinds never compare (no match)

use chrono::{DateTime, Utc};
use exocore_core::{FieldPredicateValue, FieldValue, Operator};
use std::cmp::Ordering as CmpOrdering;

/// Normalized, totally ordered field value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    /// Boolean
    Bool(bool),
    /// Signed or unsigned integer
    Int(i128),
    /// Float, as `total_order_bits`
    Float(i64),
    /// UTC timestamp
    Date(DateTime<Utc>),
    /// String
    String(String),
}

/// Map a float to an integer whose order matches `f64::total_cmp`
pub fn total_order_bits(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    bits ^ ((((bits >> 63) as u64) >> 1) as i64)
}

impl IndexKey {
    /// Key of a stored field value; references are not indexable
    pub fn from_field(value: &FieldValue) -> Option<IndexKey> {
        match value {
            FieldValue::String(s) => Some(IndexKey::String(s.clone())),
            FieldValue::Int64(v) => Some(IndexKey::Int(*v as i128)),
            FieldValue::Uint64(v) => Some(IndexKey::Int(*v as i128)),
            FieldValue::Float(v) => Some(IndexKey::Float(total_order_bits(*v))),
            FieldValue::Bool(v) => Some(IndexKey::Bool(*v)),
            FieldValue::Date(v) => Some(IndexKey::Date(*v)),
            FieldValue::Reference(_) => None,
        }
    }

    /// Key of a predicate comparison value
    pub fn from_predicate(value: &FieldPredicateValue) -> IndexKey {
        match value {
            FieldPredicateValue::String(s) => IndexKey::String(s.clone()),
            FieldPredicateValue::Int64(v) => IndexKey::Int(*v as i128),
            FieldPredicateValue::Uint64(v) => IndexKey::Int(*v as i128),
            FieldPredicateValue::Date(v) => IndexKey::Date(*v),
        }
    }

    /// Whether two keys are of the same kind
    pub fn same_kind(&self, other: &IndexKey) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Compare with a key of the same kind
    pub fn compare(&self, other: &IndexKey) -> Option<CmpOrdering> {
        if self.same_kind(other) {
            Some(self.cmp(other))
        } else {
            None
        }
    }
}

/// Evaluate `value <operator> predicate` on an unindexed field
pub fn field_matches(value: &FieldValue, operator: Operator, predicate: &FieldPredicateValue) -> bool {
    IndexKey::from_field(value)
        .and_then(|key| key.compare(&IndexKey::from_predicate(predicate)))
        .map_or(false, |ord| operator.accepts(ord))
}

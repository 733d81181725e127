//! Trait index for the entity store
//!
//! This crate provides the materialized view of the mutation log:
//! - EntityRecord / TraitRecord: per-entity state with tombstones
//! - TraitIndex: validation and application of mutations
//! - Secondary indexes: trait type, field values, references, text
//! - IndexKey: ordered normalization of field values

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod key;
pub mod record;
pub mod secondary;
pub mod trait_index;

pub use key::{field_matches, IndexKey};
pub use record::{EntityRecord, TraitRecord};
pub use secondary::{ReferenceEdge, SecondaryIndexes};
pub use trait_index::{AppliedMutation, TraitIndex};

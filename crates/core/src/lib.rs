//! Core types for the Exocore entity store
//!
//! This crate defines the foundational types used throughout the system:
//! - EntityId, TraitId, OperationId, Reference: identifiers
//! - TraitMessage, FieldValue: typed trait payloads
//! - Entity, Trait: records
//! - EntityMutation, Mutation: mutation requests and their trait fold
//! - EntityQuery, Predicate, Ordering, OrderingValue, Paging: query language
//! - EntityResults, EntityResult: query responses
//! - TraitSchema, FieldOptions, SchemaRegistry: field index annotations
//! - wire: flat message shapes with oneof verification
//! - Error: error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod error;
pub mod mutation;
pub mod query;
pub mod schema;
pub mod types;
pub mod value;
pub mod wire;

pub use entity::{Entity, Trait};
pub use error::{Error, Result};
pub use mutation::{
    CompactTraitMutation, CompactedOperation, DeleteEntityMutation, DeleteTraitMutation,
    EntityMutation, Mutation, MutationRequest, MutationResult, PutTraitMutation, TestMutation,
    UpdateTraitMutation,
};
pub use query::{
    AllPredicate, EntityQuery, EntityResult, EntityResults, FieldPredicateValue, IdsPredicate,
    MatchPredicate, Operator, Ordering, OrderingKey, OrderingValue, OrderingValueKind,
    OperationsPredicate, Paging, Predicate, ReferencePredicate, ResultSource, TestPredicate,
    TraitFieldPredicate, TraitFieldReferencePredicate, TraitPredicate, TraitQuery, WatchToken,
};
pub use schema::{FieldOptions, SchemaRegistry, TraitSchema};
pub use types::{EntityId, OperationId, Reference, TraitId, TraitRef};
pub use value::{FieldValue, TraitMessage};

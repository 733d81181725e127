//! Exocore entity store
//!
//! An in-memory entity/trait store: entities made of typed traits, mutated
//! through an append-only operation log and retrieved with predicate queries,
//! cursor paging, result hashing and watch queries.
//!
//! # Quick Start
//!
//! ```
//! use exocore_store::{EntityMutation, EntityQuery, EntityStore, SchemaRegistry, Trait, TraitMessage};
//!
//! let store = EntityStore::with_schemas(SchemaRegistry::new())?;
//! let message = TraitMessage::new("exocore.test.TestMessage").with_field("string1", "hello");
//! let op = store.mutate_one(EntityMutation::put_trait("e1", Trait::new("t1", message)))?;
//!
//! let results = store.query(&EntityQuery::ids(["e1"]))?;
//! assert_eq!(results.entities.len(), 1);
//! assert_eq!(results.entities[0].ordering_value.operation_id, op);
//! # Ok::<(), exocore_store::Error>(())
//! ```
//!
//! # Architecture
//!
//! All operations go through [`EntityStore`]. The domain types come from
//! `exocore-core`; allocator, log and index internals are not exposed.

pub use exocore_core::*;
pub use exocore_engine::{
    EntityStore, IdSource, QueryPlan, StoreConfig, StoreStats, WatchHandle, CONFIG_FILE_NAME,
};

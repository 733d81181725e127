//! Entity store engine
//!
//! This crate orchestrates the lower layers:
//! - EntityStore: mutation and query service
//! - Query planning and predicate evaluation
//! - Ordering and cursor paging
//! - Result hashing and watch queries
//! - Store configuration (`exocore-store.toml`)
//!
//! The engine is the only component that knows about:
//! - The mutation path (allocator, log, index, watches)
//! - Watch re-evaluation workers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod hasher;
pub mod ordering;
pub mod planner;
pub mod store;
pub mod watch;
pub mod workers;

pub use config::{IdSource, StoreConfig, CONFIG_FILE_NAME};
pub use hasher::hash_results;
pub use planner::{Access, Filter, QueryPlan};
pub use store::{EntityStore, StoreStats};
pub use watch::WatchHandle;
pub use workers::WorkerStats;

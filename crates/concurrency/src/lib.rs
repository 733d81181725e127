//! Concurrency layer for the entity store
//!
//! This crate provides:
//! - OperationIdAllocator: monotonic operation ids, fatal on exhaustion
//! - EntityLocks: single-writer-per-entity serialization
//! - check_last_operation: the `if_last_operation_id` compare-and-swap

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod locks;
pub mod validation;

pub use allocator::OperationIdAllocator;
pub use locks::EntityLocks;
pub use validation::check_last_operation;

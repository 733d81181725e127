//! Error types for the entity store
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Taxonomy
//!
//! - **Conflict**: optimistic concurrency check failed, mutation not applied
//! - **Validation**: malformed mutation or query, rejected before log append
//! - **Fatal**: allocator exhaustion or log append failure, halts the mutation path
//! - **Transient**: index unavailable, caller may retry
//!
//! Lookups of missing or tombstoned entities are never errors; they produce
//! empty results.

use crate::types::{EntityId, OperationId, TraitId};
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the entity store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// `if_last_operation_id` did not match the trait's last applied operation
    #[error("Conflict on {entity_id}/{trait_id}: expected last operation {expected}, found {actual}")]
    Conflict {
        /// Entity the mutation targeted
        entity_id: EntityId,
        /// Trait the mutation targeted
        trait_id: TraitId,
        /// Operation id supplied by the caller
        expected: OperationId,
        /// Operation id currently applied
        actual: OperationId,
    },

    /// Malformed mutation or query
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation id allocator cannot issue further ids
    #[error("Operation id allocator exhausted")]
    AllocatorExhausted,

    /// The mutation log refused an append
    #[error("Mutation log append failed: {0}")]
    LogAppend(String),

    /// A previous fatal error stopped the mutation path
    #[error("Mutation path halted after a fatal error")]
    Halted,

    /// The index cannot serve requests right now
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Returns true for optimistic concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns true for errors that halt the mutation path
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AllocatorExhausted | Error::LogAppend(_) | Error::Halted
        )
    }

    /// Returns true for errors a caller may retry unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::IndexUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict {
            entity_id: "e1".into(),
            trait_id: "t1".into(),
            expected: 10,
            actual: 11,
        };
        let msg = err.to_string();
        assert!(msg.contains("Conflict"));
        assert!(msg.contains("e1/t1"));
        assert!(msg.contains("10"));
        assert!(msg.contains("11"));
    }

    #[test]
    fn test_error_display_validation() {
        let err = Error::validation("missing trait id");
        let msg = err.to_string();
        assert!(msg.contains("Validation error"));
        assert!(msg.contains("missing trait id"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Conflict {
            entity_id: "e".into(),
            trait_id: "t".into(),
            expected: 1,
            actual: 2
        }
        .is_conflict());
        assert!(Error::AllocatorExhausted.is_fatal());
        assert!(Error::LogAppend("dup".into()).is_fatal());
        assert!(Error::Halted.is_fatal());
        assert!(!Error::validation("x").is_fatal());
        assert!(Error::IndexUnavailable("shutdown".into()).is_retryable());
        assert!(!Error::validation("x").is_retryable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let result: Result<serde_json::Value> =
            serde_json::from_str("{not json").map_err(|e| e.into());
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}

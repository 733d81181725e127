//! Optimistic concurrency check for guarded updates
//!
//! `UpdateTraitMutation.if_last_operation_id` is the store's only
//! compare-and-swap primitive. The check runs under the entity write lock,
//! right before the operation id is allocated.

use exocore_core::{EntityId, Error, OperationId, Result, TraitId};

/// Compare the caller's expected last operation with the applied one
///
/// `expected = None` is an unconditional update and always passes.
pub fn check_last_operation(
    entity_id: &EntityId,
    trait_id: &TraitId,
    expected: Option<OperationId>,
    actual: OperationId,
) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => {
            tracing::debug!(
                target: "exocore::index",
                entity_id = %entity_id,
                trait_id = %trait_id,
                expected,
                actual,
                "Rejected update on last operation mismatch"
            );
            Err(Error::Conflict {
                entity_id: entity_id.clone(),
                trait_id: trait_id.clone(),
                expected,
                actual,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconditional_passes() {
        assert!(check_last_operation(&"e1".into(), &"t1".into(), None, 10).is_ok());
    }

    #[test]
    fn test_matching_passes() {
        assert!(check_last_operation(&"e1".into(), &"t1".into(), Some(10), 10).is_ok());
    }

    #[test]
    fn test_stale_is_conflict() {
        let err = check_last_operation(&"e1".into(), &"t1".into(), Some(9), 10).unwrap_err();
        assert_eq!(
            err,
            Error::Conflict {
                entity_id: "e1".into(),
                trait_id: "t1".into(),
                expected: 9,
                actual: 10,
            }
        );
    }
}

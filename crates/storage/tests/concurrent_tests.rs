//! Concurrent tests for the trait index
//!
//! These tests drive `TraitIndex` the way the store does: validate, allocate
//! and apply under the entity write lock, from many threads at once.
//!
//! 1. **Disjoint writers** - mutations of different entities never interfere
//! 2. **Guarded updates** - exactly one racing CAS update wins
//! 3. **Readers during writes** - lookups stay consistent with the writes
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use exocore_concurrency::{EntityLocks, OperationIdAllocator};
use exocore_core::{
    EntityId, EntityMutation, Error, FieldOptions, FieldPredicateValue, OperationId, Operator,
    Result, SchemaRegistry, Trait, TraitMessage, TraitSchema,
};
use exocore_storage::TraitIndex;

const TYPE: &str = "exocore.test.TestMessage";

// ============================================================================
// Test Helpers
// ============================================================================

struct Env {
    index: TraitIndex,
    allocator: OperationIdAllocator,
    locks: EntityLocks,
}

fn create_env() -> Arc<Env> {
    let schemas = SchemaRegistry::new().with_schema(
        TraitSchema::new(TYPE)
            .with_field("name", FieldOptions::indexed())
            .with_field("body", FieldOptions::text()),
    );
    Arc::new(Env {
        index: TraitIndex::new(schemas),
        allocator: OperationIdAllocator::default(),
        locks: EntityLocks::new(),
    })
}

fn mutate(env: &Env, mutation: EntityMutation) -> Result<OperationId> {
    let entity_id = mutation.entity_id.clone();
    env.locks.with_entity(&entity_id, || {
        env.index.validate(&mutation)?;
        let op = env.allocator.next()?;
        env.index.apply(&mutation, op)?;
        Ok(op)
    })
}

fn message(name: &str, body: &str) -> TraitMessage {
    TraitMessage::new(TYPE)
        .with_field("name", name)
        .with_field("body", body)
}

// ============================================================================
// SECTION 1: Disjoint Writers
// ============================================================================

mod disjoint_writers {
    use super::*;

    #[test]
    fn test_writers_on_distinct_entities() {
        let env = create_env();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let env = Arc::clone(&env);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let entity = format!("e{}", t);
                    (0..100)
                        .map(|i| {
                            let put = EntityMutation::put_trait(
                                entity.as_str(),
                                Trait::new(format!("t{}", i), message("n", "text")),
                            );
                            mutate(&env, put).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for h in handles {
            for op in h.join().unwrap() {
                assert!(ids.insert(op), "operation id {} issued twice", op);
            }
        }

        assert_eq!(env.index.len(), 8);
        assert_eq!(env.index.traits_of_type(TYPE, false).len(), 800);
        for t in 0..8 {
            let record = env.index.record(&EntityId::new(format!("e{}", t))).unwrap();
            assert_eq!(record.operations.len(), 100);
            assert!(record.operations.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_entity_delete_races_with_other_entities() {
        let env = create_env();
        for t in 0..4 {
            let put = EntityMutation::put_trait(
                format!("e{}", t).as_str(),
                Trait::new("t1", message("n", "shared words")),
            );
            mutate(&env, put).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let env = Arc::clone(&env);
                thread::spawn(move || {
                    let entity = format!("e{}", t);
                    if t % 2 == 0 {
                        mutate(&env, EntityMutation::delete_entity(entity.as_str())).unwrap();
                    } else {
                        let put = EntityMutation::put_trait(
                            entity.as_str(),
                            Trait::new("t2", message("n", "more")),
                        );
                        mutate(&env, put).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(env.index.entity_ids(false).len(), 2);
        assert_eq!(env.index.entity_ids(true).len(), 4);
        assert_eq!(env.index.traits_of_type(TYPE, false).len(), 4);
        assert_eq!(env.index.traits_of_type(TYPE, true).len(), 6);
        assert_eq!(env.index.search_text("shared", false).len(), 2);
        assert_eq!(env.index.search_text("shared", true).len(), 4);
    }
}

// ============================================================================
// SECTION 2: Guarded Updates
// ============================================================================

mod guarded_updates {
    use super::*;

    #[test]
    fn test_single_winner_among_racing_updates() {
        let env = create_env();
        let seed = mutate(
            &env,
            EntityMutation::put_trait("e1", Trait::new("t1", message("v0", "x"))),
        )
        .unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let env = Arc::clone(&env);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let update = EntityMutation::update_trait(
                        "e1",
                        "t1",
                        Trait::new("t1", message(&format!("v{}", t + 1), "x")),
                        vec!["name".to_string()],
                        Some(seed),
                    );
                    mutate(&env, update)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);

        let winning_op = *winners[0];
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            match err {
                Error::Conflict {
                    expected, actual, ..
                } => {
                    assert_eq!(*expected, seed);
                    assert_eq!(*actual, winning_op);
                }
                other => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(
            env.index
                .trait_last_operation(&EntityId::new("e1"), &"t1".into()),
            Some(winning_op)
        );
    }

    #[test]
    fn test_rejected_update_leaves_index_untouched() {
        let env = create_env();
        let seed = mutate(
            &env,
            EntityMutation::put_trait("e1", Trait::new("t1", message("before", "x"))),
        )
        .unwrap();

        let stale = EntityMutation::update_trait(
            "e1",
            "t1",
            Trait::new("t1", message("after", "x")),
            vec!["name".to_string()],
            Some(seed + 100),
        );
        assert!(matches!(mutate(&env, stale), Err(Error::Conflict { .. })));

        let before = FieldPredicateValue::String("before".into());
        let refs = env
            .index
            .field_lookup(TYPE, "name", Operator::Equal, &before, false);
        assert_eq!(refs.len(), 1);
        let record = env.index.record(&EntityId::new("e1")).unwrap();
        assert_eq!(record.operations, vec![seed]);
    }
}

// ============================================================================
// SECTION 3: Readers During Writes
// ============================================================================

mod readers_during_writes {
    use super::*;

    #[test]
    fn test_lookups_during_updates_never_duplicate() {
        let env = create_env();
        mutate(
            &env,
            EntityMutation::put_trait("e1", Trait::new("t1", message("a", "x"))),
        )
        .unwrap();

        let writer = {
            let env = Arc::clone(&env);
            thread::spawn(move || {
                for i in 0..200 {
                    let name = if i % 2 == 0 { "b" } else { "a" };
                    let update = EntityMutation::update_trait(
                        "e1",
                        "t1",
                        Trait::new("t1", message(name, "x")),
                        vec!["name".to_string()],
                        None,
                    );
                    mutate(&env, update).unwrap();
                }
            })
        };

        let reader = {
            let env = Arc::clone(&env);
            thread::spawn(move || {
                let a = FieldPredicateValue::String("a".into());
                let b = FieldPredicateValue::String("b".into());
                for _ in 0..200 {
                    let hits_a = env.index.field_lookup(TYPE, "name", Operator::Equal, &a, false);
                    let hits_b = env.index.field_lookup(TYPE, "name", Operator::Equal, &b, false);
                    assert!(hits_a.len() <= 1);
                    assert!(hits_b.len() <= 1);
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        let a = FieldPredicateValue::String("a".into());
        let hits = env.index.field_lookup(TYPE, "name", Operator::Equal, &a, false);
        assert_eq!(hits.len(), 1);
    }
}

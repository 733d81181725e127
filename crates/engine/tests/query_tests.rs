//! Query tests
//!
//! Predicates, ordering, paging, hashing and summaries through
//! `EntityStore::query`.

use chrono::{TimeZone, Utc};
use exocore_core::{
    EntityMutation, EntityQuery, EntityResults, Error, FieldOptions, FieldPredicateValue,
    FieldValue, Operator, Ordering, OrderingValue, Paging, Reference, SchemaRegistry, Trait,
    TraitFieldPredicate, TraitFieldReferencePredicate, TraitMessage, TraitQuery, TraitSchema,
};
use exocore_engine::{EntityStore, StoreConfig};
use proptest::prelude::*;
use std::collections::HashSet;

const TYPE: &str = "exocore.test.TestMessage";
const OTHER: &str = "exocore.test.OtherMessage";

fn schemas() -> SchemaRegistry {
    SchemaRegistry::new().with_schema(
        TraitSchema::new(TYPE)
            .with_field("string1", FieldOptions::text())
            .with_field("string2", FieldOptions::indexed())
            .with_field("uint1", FieldOptions::sorted())
            .with_field("int1", FieldOptions::sorted())
            .with_field("date1", FieldOptions::sorted())
            .with_field("ref1", FieldOptions::indexed()),
    )
}

fn store() -> EntityStore {
    EntityStore::with_schemas(schemas()).unwrap()
}

fn put(store: &EntityStore, e: &str, t: &str, message: TraitMessage) -> u64 {
    store
        .mutate_one(EntityMutation::put_trait(e, Trait::new(t, message)))
        .unwrap()
}

fn text(s: &str) -> TraitMessage {
    TraitMessage::new(TYPE).with_field("string1", s)
}

fn ids(results: &EntityResults) -> Vec<String> {
    results
        .entities
        .iter()
        .map(|r| r.entity.id.to_string())
        .collect()
}

fn sorted_ids(results: &EntityResults) -> Vec<String> {
    let mut ids = ids(results);
    ids.sort();
    ids
}

fn field(name: &str, operator: Operator, value: FieldPredicateValue) -> EntityQuery {
    EntityQuery::with_trait_query(
        TYPE,
        TraitQuery::Field(TraitFieldPredicate::new(name, operator, value)),
    )
}

// ============================================================================
// Predicates
// ============================================================================

#[test]
fn test_ids_with_operation_ascending_returns_exactly_requested() {
    let store = store();
    put(&store, "e1", "t1", text("hello"));
    put(&store, "e2", "t1", text("world"));

    let results = store
        .query(&EntityQuery::ids(["e1"]).with_ordering(Ordering::operation_id(true)))
        .unwrap();
    assert_eq!(ids(&results), vec!["e1"]);
    assert_eq!(results.estimated_count, 1);
    assert!(results.next_page.is_none());
}

#[test]
fn test_unknown_ids_give_empty_results() {
    let store = store();
    let results = store.query(&EntityQuery::ids(["missing"])).unwrap();
    assert!(results.entities.is_empty());
    assert_eq!(results.estimated_count, 0);
}

#[test]
fn test_trait_type_predicate() {
    let store = store();
    put(&store, "e1", "t1", text("a"));
    put(&store, "e2", "t1", TraitMessage::new(OTHER).with_field("x", 1u64));
    let results = store.query(&EntityQuery::with_trait(TYPE)).unwrap();
    assert_eq!(ids(&results), vec!["e1"]);
}

#[test]
fn test_field_predicates_indexed_and_unindexed() {
    let store = store();
    for (i, e) in ["e1", "e2", "e3", "e4"].iter().enumerate() {
        put(
            &store,
            e,
            "t1",
            text("x")
                .with_field("uint1", i as u64)
                .with_field("int1", i as i64 - 2)
                .with_field("string2", format!("s{}", i))
                .with_field("string3", format!("u{}", i)),
        );
    }

    let q = field("uint1", Operator::Gt, FieldPredicateValue::Uint64(1));
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e3", "e4"]);

    let q = field("int1", Operator::Lte, FieldPredicateValue::Int64(-1));
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e1", "e2"]);

    let q = field("string2", Operator::Equal, FieldPredicateValue::String("s2".into()));
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e3"]);

    // string3 has no value index, the planner filters trait candidates
    let q = field("string3", Operator::Gte, FieldPredicateValue::String("u2".into()));
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e3", "e4"]);

    // a value of another kind never matches
    let q = field("uint1", Operator::Equal, FieldPredicateValue::String("1".into()));
    assert!(store.query(&q).unwrap().entities.is_empty());
}

#[test]
fn test_date_field_predicate() {
    let store = store();
    let day = |d: u32| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
    put(&store, "e1", "t1", text("x").with_field("date1", day(1)));
    put(&store, "e2", "t1", text("x").with_field("date1", day(2)));
    let q = field("date1", Operator::Gte, FieldPredicateValue::Date(day(2)));
    assert_eq!(ids(&store.query(&q).unwrap()), vec!["e2"]);
}

#[test]
fn test_match_scores_and_default_order() {
    let store = store();
    put(&store, "e1", "t1", text("apple banana cherry durian"));
    put(&store, "e2", "t1", text("apple apple"));
    put(&store, "e3", "t1", text("nothing relevant"));

    let results = store.query(&EntityQuery::matches("apple")).unwrap();
    assert_eq!(sorted_ids(&results), vec!["e1", "e2"]);
    // default ordering is by descending score
    let scores: Vec<OrderingValue> = results.entities.iter().map(|r| r.ordering_value).collect();
    assert!(scores.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(ids(&results)[0], "e2");

    let err = store.query(&EntityQuery::matches("?!")).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn test_trait_match_is_scoped_to_type() {
    let store = store();
    put(&store, "e1", "t1", text("apple"));
    store.register_schema(TraitSchema::new(OTHER).with_field("body", FieldOptions::text()));
    put(&store, "e2", "t1", TraitMessage::new(OTHER).with_field("body", "apple"));

    assert_eq!(sorted_ids(&store.query(&EntityQuery::matches("apple")).unwrap()), vec!["e1", "e2"]);
    let q = EntityQuery::with_trait_query(
        OTHER,
        TraitQuery::Match(exocore_core::MatchPredicate {
            query: "apple".into(),
        }),
    );
    assert_eq!(ids(&store.query(&q).unwrap()), vec!["e2"]);
}

#[test]
fn test_reference_predicates() {
    let store = store();
    put(
        &store,
        "e1",
        "t1",
        text("a").with_field("ref1", Reference::to_trait("target", "tt")),
    );
    put(
        &store,
        "e2",
        "t1",
        text("b").with_field("ref2", Reference::entity("target")),
    );
    put(&store, "e3", "t1", text("c").with_field("ref1", Reference::entity("elsewhere")));

    let q = EntityQuery::referencing(Reference::entity("target"));
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e1", "e2"]);

    let q = EntityQuery::referencing(Reference::to_trait("target", "tt"));
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e1"]);

    let q = EntityQuery::with_trait_query(
        TYPE,
        TraitQuery::Reference(TraitFieldReferencePredicate {
            field: "ref1".into(),
            reference: Reference::entity("target"),
        }),
    );
    assert_eq!(ids(&store.query(&q).unwrap()), vec!["e1"]);
}

#[test]
fn test_operations_predicate() {
    let store = store();
    let op1 = put(&store, "e1", "t1", text("a"));
    let op2 = put(&store, "e2", "t1", text("b"));
    put(&store, "e3", "t1", text("c"));
    let q = EntityQuery::operations(vec![op1, op2, 999]);
    assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e1", "e2"]);
}

#[test]
fn test_include_deleted() {
    let store = store();
    put(&store, "e1", "t1", text("apple").with_field("uint1", 1u64));
    put(&store, "e2", "t1", text("apple").with_field("uint1", 1u64));
    store
        .mutate_one(EntityMutation::delete_entity("e2"))
        .unwrap();

    let queries = [
        EntityQuery::all(),
        EntityQuery::matches("apple"),
        EntityQuery::with_trait(TYPE),
        field("uint1", Operator::Equal, FieldPredicateValue::Uint64(1)),
        EntityQuery::ids(["e1", "e2"]),
    ];
    for q in queries {
        assert_eq!(sorted_ids(&store.query(&q).unwrap()), vec!["e1"], "{:?}", q.predicate);
        let with_deleted = store.query(&q.clone().include_deleted()).unwrap();
        assert_eq!(sorted_ids(&with_deleted), vec!["e1", "e2"], "{:?}", q.predicate);
    }
}

#[test]
fn test_test_predicate() {
    let store = store();
    put(&store, "e1", "t1", text("a"));
    assert!(store.query(&EntityQuery::test(true)).unwrap().entities.is_empty());
    assert!(matches!(
        store.query(&EntityQuery::test(false)),
        Err(Error::Validation(_))
    ));
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_field_ordering_ties_break_on_operation_id() {
    let store = store();
    put(&store, "e1", "t1", text("x").with_field("uint1", 5u64));
    put(&store, "e2", "t1", text("x").with_field("uint1", 5u64));
    put(&store, "e3", "t1", text("x").with_field("uint1", 1u64));
    put(&store, "e4", "t1", text("x"));

    let q = EntityQuery::with_trait(TYPE).with_ordering(Ordering::field("uint1", true));
    let first = store.query(&q).unwrap();
    assert_eq!(ids(&first), vec!["e4", "e3", "e1", "e2"]);
    // same state, same order
    assert_eq!(ids(&store.query(&q).unwrap()), ids(&first));

    let q = EntityQuery::with_trait(TYPE).with_ordering(Ordering::field("uint1", false));
    assert_eq!(ids(&store.query(&q).unwrap()), vec!["e2", "e1", "e3", "e4"]);
}

#[test]
fn test_date_ordering() {
    let store = store();
    let day = |d: u32| Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap();
    put(&store, "e1", "t1", text("x").with_field("date1", day(3)));
    put(&store, "e2", "t1", text("x").with_field("date1", day(1)));
    put(&store, "e3", "t1", text("x").with_field("date1", day(2)));
    let q = EntityQuery::all().with_ordering(Ordering::field("date1", true));
    assert_eq!(ids(&store.query(&q).unwrap()), vec!["e2", "e3", "e1"]);
}

#[test]
fn test_ordering_by_text_field_rejected() {
    let store = store();
    put(&store, "e1", "t1", text("x"));
    let q = EntityQuery::all().with_ordering(Ordering::field("string1", true));
    assert!(matches!(store.query(&q), Err(Error::Validation(_))));
}

#[test]
fn test_default_ordering_most_recent_first() {
    let store = store();
    put(&store, "e1", "t1", text("a"));
    put(&store, "e2", "t1", text("b"));
    put(&store, "e1", "t2", text("c"));
    assert_eq!(ids(&store.query(&EntityQuery::all()).unwrap()), vec!["e1", "e2"]);
}

// ============================================================================
// Paging
// ============================================================================

#[test]
fn test_paging_walks_all_results() {
    let store = store();
    for i in 0..7 {
        put(&store, &format!("e{}", i), "t1", text("x"));
    }

    let mut seen = Vec::new();
    let mut query = EntityQuery::all().with_count(3);
    loop {
        let results = store.query(&query).unwrap();
        assert_eq!(results.estimated_count, 7);
        assert!(results.entities.len() <= 3);
        seen.extend(ids(&results));
        match results.next_page {
            Some(next) => query = query.with_paging(next),
            None => break,
        }
    }
    assert_eq!(seen, vec!["e6", "e5", "e4", "e3", "e2", "e1", "e0"]);
}

#[test]
fn test_page_size_defaults_and_clamps() {
    let config = StoreConfig {
        default_page_size: 2,
        max_page_size: 4,
        ..Default::default()
    };
    let store = EntityStore::new(config, schemas()).unwrap();
    for i in 0..6 {
        put(&store, &format!("e{}", i), "t1", text("x"));
    }

    let results = store.query(&EntityQuery::all()).unwrap();
    assert_eq!(results.entities.len(), 2);
    assert_eq!(results.current_page.map(|p| p.count), Some(2));

    let results = store.query(&EntityQuery::all().with_count(100)).unwrap();
    assert_eq!(results.entities.len(), 4);
}

#[test]
fn test_inverted_paging_bounds_rejected() {
    let store = store();
    let paging = Paging {
        after_ordering_value: Some(OrderingValue::uint64(5, 5)),
        before_ordering_value: Some(OrderingValue::uint64(2, 2)),
        count: 10,
    };
    let err = store.query(&EntityQuery::all().with_paging(paging)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_paging_is_complete_and_disjoint(
        values in prop::collection::vec(prop::option::of(0u64..10), 1..30),
        count in 1u32..6,
        ascending in any::<bool>(),
    ) {
        let store = store();
        for (i, v) in values.iter().enumerate() {
            let mut message = text("x");
            if let Some(v) = v {
                message.set("uint1", FieldValue::Uint64(*v));
            }
            put(&store, &format!("e{}", i), "t1", message);
        }

        let ordering = Ordering::field("uint1", ascending);
        let full = store
            .query(&EntityQuery::all().with_ordering(ordering.clone()).with_count(1000))
            .unwrap();
        let expected = ids(&full);
        prop_assert_eq!(expected.len(), values.len());

        let mut seen = Vec::new();
        let mut query = EntityQuery::all().with_ordering(ordering).with_count(count);
        loop {
            let results = store.query(&query).unwrap();
            seen.extend(ids(&results));
            match results.next_page {
                Some(next) => query = query.with_paging(next),
                None => break,
            }
        }
        let unique: HashSet<&String> = seen.iter().collect();
        prop_assert_eq!(unique.len(), seen.len());
        prop_assert_eq!(seen, expected);
    }
}

// ============================================================================
// Hashing and summaries
// ============================================================================

#[test]
fn test_hash_stability_and_change_detection() {
    let store = store();
    put(&store, "e1", "t1", text("a"));
    put(&store, "e2", "t1", text("b"));

    let first = store.query(&EntityQuery::all()).unwrap();
    let second = store.query(&EntityQuery::all()).unwrap();
    assert_eq!(first.hash, second.hash);

    put(&store, "e2", "t1", text("changed"));
    let third = store.query(&EntityQuery::all()).unwrap();
    assert_ne!(first.hash, third.hash);
}

#[test]
fn test_matching_result_hash_omits_entities() {
    let store = store();
    put(&store, "e1", "t1", text("a"));
    let fresh = store.query(&EntityQuery::all()).unwrap();
    assert!(!fresh.summary);

    let cached = store
        .query(&EntityQuery::all().with_result_hash(fresh.hash))
        .unwrap();
    assert!(cached.summary);
    assert!(cached.entities.is_empty());
    assert_eq!(cached.hash, fresh.hash);
    assert_eq!(cached.estimated_count, 1);

    let stale = store
        .query(&EntityQuery::all().with_result_hash(fresh.hash ^ 1))
        .unwrap();
    assert_eq!(stale.entities.len(), 1);
}

#[test]
fn test_summary_strips_payloads_but_hashes_content() {
    let store = store();
    put(&store, "e1", "t1", text("a"));
    let full = store.query(&EntityQuery::all()).unwrap();
    let summary = store.query(&EntityQuery::all().summary()).unwrap();

    assert!(summary.summary);
    assert_eq!(summary.hash, full.hash);
    let t = &summary.entities[0].entity.traits[0];
    assert!(t.message.is_none());
    assert!(t.creation_date.is_some());
}

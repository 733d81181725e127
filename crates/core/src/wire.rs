//! Flat message shapes of the wire schema
//!
//! Each `oneof` of the schema is a group of optional fields here, exactly as
//! a generated message exposes it. Conversion into the domain sum types
//! (`TryFrom`) performs the "multiple values" and "missing value" checks of
//! the generated `verify()`; conversion back (`From`) is infallible.
//!
//! JSON field names follow the proto3 JSON mapping (lowerCamelCase).

use crate::entity::{Entity, Trait};
use crate::error::{Error, Result};
use crate::mutation::{
    CompactTraitMutation, CompactedOperation, DeleteEntityMutation, DeleteTraitMutation,
    EntityMutation, Mutation, MutationRequest, MutationResult, PutTraitMutation, TestMutation,
    UpdateTraitMutation,
};
use crate::query::{
    AllPredicate, EntityQuery, EntityResult, EntityResults, FieldPredicateValue, IdsPredicate,
    MatchPredicate, Operator, Ordering, OrderingKey, OrderingValue, OrderingValueKind,
    OperationsPredicate, Paging, Predicate, ReferencePredicate, ResultSource, TestPredicate,
    TraitFieldPredicate, TraitFieldReferencePredicate, TraitPredicate, TraitQuery,
};
use crate::types::{EntityId, OperationId, TraitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field numbers of the compatibility contract
pub mod field_numbers {
    /// `EntityMutation` oneof members
    pub mod entity_mutation {
        /// `entityId`
        pub const ENTITY_ID: u32 = 1;
        /// `putTrait`
        pub const PUT_TRAIT: u32 = 2;
        /// `deleteTrait`
        pub const DELETE_TRAIT: u32 = 3;
        /// `deleteEntity`
        pub const DELETE_ENTITY: u32 = 4;
        /// `updateTrait`
        pub const UPDATE_TRAIT: u32 = 5;
        /// `compactTrait`
        pub const COMPACT_TRAIT: u32 = 6;
        /// `test`
        pub const TEST: u32 = 99;
    }

    /// `EntityQuery` fields
    pub mod entity_query {
        /// `match`
        pub const MATCH: u32 = 1;
        /// `trait`
        pub const TRAIT: u32 = 2;
        /// `ids`
        pub const IDS: u32 = 3;
        /// `reference`
        pub const REFERENCE: u32 = 4;
        /// `paging`
        pub const PAGING: u32 = 5;
        /// `ordering`
        pub const ORDERING: u32 = 6;
        /// `summary`
        pub const SUMMARY: u32 = 7;
        /// `watchToken`
        pub const WATCH_TOKEN: u32 = 8;
        /// `resultHash`
        pub const RESULT_HASH: u32 = 9;
        /// `operations`
        pub const OPERATIONS: u32 = 10;
        /// `all`
        pub const ALL: u32 = 11;
        /// `includeDeleted`
        pub const INCLUDE_DELETED: u32 = 12;
        /// `test`
        pub const TEST: u32 = 99;
    }

    /// `OrderingValue` fields
    pub mod ordering_value {
        /// `float`
        pub const FLOAT: u32 = 1;
        /// `uint64`
        pub const UINT64: u32 = 2;
        /// `date`
        pub const DATE: u32 = 3;
        /// `min`
        pub const MIN: u32 = 4;
        /// `max`
        pub const MAX: u32 = 5;
        /// `operationId`
        pub const OPERATION_ID: u32 = 6;
    }
}

/// Pick the single populated member of a oneof
///
/// `members` pairs each member name with its converted value, if set.
fn one_of<T>(message: &str, members: Vec<(&'static str, Option<T>)>) -> Result<T> {
    let mut set = members.into_iter().filter_map(|(name, v)| v.map(|v| (name, v)));
    match (set.next(), set.next()) {
        (Some((_, value)), None) => Ok(value),
        (Some((first, _)), Some((second, _))) => Err(Error::validation(format!(
            "{}: multiple values ({} and {})",
            message, first, second
        ))),
        (None, _) => Err(Error::validation(format!("{}: missing value", message))),
    }
}

fn nonzero(id: u64) -> Option<u64> {
    (id != 0).then_some(id)
}

// ============================================================================
// Mutations
// ============================================================================

/// `MutationRequest{1:mutations[], 2:waitIndexed, 3:returnEntities}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMutationRequest {
    /// 1
    #[serde(default)]
    pub mutations: Vec<WireEntityMutation>,
    /// 2
    #[serde(default)]
    pub wait_indexed: bool,
    /// 3
    #[serde(default)]
    pub return_entities: bool,
}

/// `MutationResult{1:operationIds[], 2:entities[]}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMutationResult {
    /// 1
    #[serde(default)]
    pub operation_ids: Vec<OperationId>,
    /// 2
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// `EntityMutation{1:entityId, oneof[2..6, 99]}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntityMutation {
    /// 1
    #[serde(default)]
    pub entity_id: EntityId,
    /// 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_trait: Option<WirePutTraitMutation>,
    /// 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_trait: Option<WireDeleteTraitMutation>,
    /// 4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_entity: Option<WireDeleteEntityMutation>,
    /// 5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_trait: Option<WireUpdateTraitMutation>,
    /// 6
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compact_trait: Option<WireCompactTraitMutation>,
    /// 99
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<WireTestMutation>,
}

/// `PutTraitMutation{1:trait}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WirePutTraitMutation {
    /// 1
    #[serde(default, rename = "trait")]
    pub r#trait: Option<Trait>,
}

/// `DeleteTraitMutation{1:traitId}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDeleteTraitMutation {
    /// 1
    #[serde(default)]
    pub trait_id: TraitId,
}

/// `DeleteEntityMutation{}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireDeleteEntityMutation {}

/// `UpdateTraitMutation{1:traitId,2:trait,3:fieldMask,4:ifLastOperationId}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUpdateTraitMutation {
    /// 1
    #[serde(default)]
    pub trait_id: TraitId,
    /// 2
    #[serde(default, rename = "trait")]
    pub r#trait: Option<Trait>,
    /// 3
    #[serde(default)]
    pub field_mask: Option<WireFieldMask>,
    /// 4, 0 when unconditional
    #[serde(default)]
    pub if_last_operation_id: OperationId,
}

/// `google.protobuf.FieldMask{1:paths[]}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireFieldMask {
    /// 1
    #[serde(default)]
    pub paths: Vec<String>,
}

/// `CompactTraitMutation{1:compactedOperations[]{1:operationId},2:trait}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCompactTraitMutation {
    /// 1
    #[serde(default)]
    pub compacted_operations: Vec<CompactedOperation>,
    /// 2
    #[serde(default, rename = "trait")]
    pub r#trait: Option<Trait>,
}

/// `TestMutation{1:success}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireTestMutation {
    /// 1
    #[serde(default)]
    pub success: bool,
}

fn required_trait(t: Option<Trait>, message: &str) -> Result<Trait> {
    t.ok_or_else(|| Error::validation(format!("{}: missing trait", message)))
}

impl TryFrom<WireEntityMutation> for EntityMutation {
    type Error = Error;

    fn try_from(w: WireEntityMutation) -> Result<Self> {
        let mutation = one_of(
            "EntityMutation.mutation",
            vec![
                (
                    "putTrait",
                    w.put_trait
                        .map(|m| -> Result<Mutation> {
                            Ok(Mutation::PutTrait(PutTraitMutation {
                                r#trait: required_trait(m.r#trait, "PutTraitMutation")?,
                            }))
                        }),
                ),
                (
                    "deleteTrait",
                    w.delete_trait.map(|m| {
                        Ok(Mutation::DeleteTrait(DeleteTraitMutation {
                            trait_id: m.trait_id,
                        }))
                    }),
                ),
                (
                    "deleteEntity",
                    w.delete_entity
                        .map(|_| Ok(Mutation::DeleteEntity(DeleteEntityMutation {}))),
                ),
                (
                    "updateTrait",
                    w.update_trait.map(|m| {
                        Ok(Mutation::UpdateTrait(UpdateTraitMutation {
                            trait_id: m.trait_id,
                            r#trait: required_trait(m.r#trait, "UpdateTraitMutation")?,
                            field_mask: m.field_mask.map(|f| f.paths).unwrap_or_default(),
                            if_last_operation_id: nonzero(m.if_last_operation_id),
                        }))
                    }),
                ),
                (
                    "compactTrait",
                    w.compact_trait.map(|m| {
                        Ok(Mutation::CompactTrait(CompactTraitMutation {
                            compacted_operations: m.compacted_operations,
                            r#trait: required_trait(m.r#trait, "CompactTraitMutation")?,
                        }))
                    }),
                ),
                (
                    "test",
                    w.test
                        .map(|m| Ok(Mutation::Test(TestMutation { success: m.success }))),
                ),
            ],
        )??;
        Ok(EntityMutation {
            entity_id: w.entity_id,
            mutation,
        })
    }
}

impl From<EntityMutation> for WireEntityMutation {
    fn from(m: EntityMutation) -> Self {
        let mut w = WireEntityMutation {
            entity_id: m.entity_id,
            ..Default::default()
        };
        match m.mutation {
            Mutation::PutTrait(p) => {
                w.put_trait = Some(WirePutTraitMutation {
                    r#trait: Some(p.r#trait),
                })
            }
            Mutation::DeleteTrait(d) => {
                w.delete_trait = Some(WireDeleteTraitMutation {
                    trait_id: d.trait_id,
                })
            }
            Mutation::DeleteEntity(_) => w.delete_entity = Some(WireDeleteEntityMutation {}),
            Mutation::UpdateTrait(u) => {
                w.update_trait = Some(WireUpdateTraitMutation {
                    trait_id: u.trait_id,
                    r#trait: Some(u.r#trait),
                    field_mask: (!u.field_mask.is_empty()).then(|| WireFieldMask {
                        paths: u.field_mask,
                    }),
                    if_last_operation_id: u.if_last_operation_id.unwrap_or(0),
                })
            }
            Mutation::CompactTrait(c) => {
                w.compact_trait = Some(WireCompactTraitMutation {
                    compacted_operations: c.compacted_operations,
                    r#trait: Some(c.r#trait),
                })
            }
            Mutation::Test(t) => w.test = Some(WireTestMutation { success: t.success }),
        }
        w
    }
}

impl TryFrom<WireMutationRequest> for MutationRequest {
    type Error = Error;

    fn try_from(w: WireMutationRequest) -> Result<Self> {
        Ok(MutationRequest {
            mutations: w
                .mutations
                .into_iter()
                .map(EntityMutation::try_from)
                .collect::<Result<Vec<_>>>()?,
            wait_indexed: w.wait_indexed,
            return_entities: w.return_entities,
        })
    }
}

impl From<MutationRequest> for WireMutationRequest {
    fn from(r: MutationRequest) -> Self {
        WireMutationRequest {
            mutations: r.mutations.into_iter().map(Into::into).collect(),
            wait_indexed: r.wait_indexed,
            return_entities: r.return_entities,
        }
    }
}

impl From<MutationResult> for WireMutationResult {
    fn from(r: MutationResult) -> Self {
        WireMutationResult {
            operation_ids: r.operation_ids,
            entities: r.entities,
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

/// `EntityQuery{oneof predicate[1,2,3,4,10,11,99], 5..9, 12}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntityQuery {
    /// 1
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub r#match: Option<MatchPredicate>,
    /// 2
    #[serde(default, rename = "trait", skip_serializing_if = "Option::is_none")]
    pub r#trait: Option<WireTraitPredicate>,
    /// 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<IdsPredicate>,
    /// 4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferencePredicate>,
    /// 10
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<OperationsPredicate>,
    /// 11
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<AllPredicate>,
    /// 99
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<TestPredicate>,
    /// 5
    #[serde(default)]
    pub paging: Option<WirePaging>,
    /// 6
    #[serde(default)]
    pub ordering: Option<WireOrdering>,
    /// 7
    #[serde(default)]
    pub summary: bool,
    /// 8, 0 when not watched
    #[serde(default)]
    pub watch_token: u64,
    /// 9, 0 when absent
    #[serde(default)]
    pub result_hash: u64,
    /// 12
    #[serde(default)]
    pub include_deleted: bool,
}

/// `TraitPredicate{1:traitName, oneof query}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTraitPredicate {
    /// 1
    #[serde(default)]
    pub trait_name: String,
    /// 2
    #[serde(default)]
    pub query: Option<WireTraitQuery>,
}

/// `TraitQuery{oneof[1:match, 2:field, 3:reference]}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WireTraitQuery {
    /// 1
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub r#match: Option<MatchPredicate>,
    /// 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<WireTraitFieldPredicate>,
    /// 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<TraitFieldReferencePredicate>,
}

/// `TraitFieldPredicate{1:field, oneof value[2:string,3:int64,4:uint64,5:date], 6:operator}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireTraitFieldPredicate {
    /// 1
    #[serde(default)]
    pub field: String,
    /// 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    /// 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int64: Option<i64>,
    /// 4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uint64: Option<u64>,
    /// 5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// 6
    #[serde(default)]
    pub operator: i32,
}

/// `Ordering{oneof value[1:score,2:operationId,3:field], 4:ascending}`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrdering {
    /// 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<bool>,
    /// 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<bool>,
    /// 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// 4
    #[serde(default)]
    pub ascending: bool,
}

/// `OrderingValue{oneof value[1:float,2:uint64,3:date,4:min,5:max], 6:operationId}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrderingValue {
    /// 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float: Option<f64>,
    /// 2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uint64: Option<u64>,
    /// 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// 4
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<bool>,
    /// 5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<bool>,
    /// 6
    #[serde(default)]
    pub operation_id: OperationId,
}

/// `Paging{1:afterOrderingValue,2:beforeOrderingValue,3:count}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePaging {
    /// 1
    #[serde(default)]
    pub after_ordering_value: Option<WireOrderingValue>,
    /// 2
    #[serde(default)]
    pub before_ordering_value: Option<WireOrderingValue>,
    /// 3
    #[serde(default)]
    pub count: u32,
}

/// `EntityResults{1:entities[],2:summary,3:estimatedCount,4:currentPage,5:nextPage,6:hash}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntityResults {
    /// 1
    #[serde(default)]
    pub entities: Vec<WireEntityResult>,
    /// 2
    #[serde(default)]
    pub summary: bool,
    /// 3
    #[serde(default)]
    pub estimated_count: u32,
    /// 4
    #[serde(default)]
    pub current_page: Option<WirePaging>,
    /// 5
    #[serde(default)]
    pub next_page: Option<WirePaging>,
    /// 6
    #[serde(default)]
    pub hash: u64,
}

/// `EntityResult{1:entity,2:source,3:orderingValue}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntityResult {
    /// 1
    #[serde(default)]
    pub entity: Option<Entity>,
    /// 2
    #[serde(default)]
    pub source: i32,
    /// 3
    #[serde(default)]
    pub ordering_value: Option<WireOrderingValue>,
}

impl TryFrom<WireOrderingValue> for OrderingValue {
    type Error = Error;

    fn try_from(w: WireOrderingValue) -> Result<Self> {
        let value = one_of(
            "OrderingValue.value",
            vec![
                ("float", w.float.map(OrderingValueKind::Float)),
                ("uint64", w.uint64.map(OrderingValueKind::Uint64)),
                ("date", w.date.map(OrderingValueKind::Date)),
                ("min", w.min.map(|_| OrderingValueKind::Min)),
                ("max", w.max.map(|_| OrderingValueKind::Max)),
            ],
        )?;
        Ok(OrderingValue {
            value,
            operation_id: w.operation_id,
        })
    }
}

impl From<OrderingValue> for WireOrderingValue {
    fn from(v: OrderingValue) -> Self {
        let mut w = WireOrderingValue {
            operation_id: v.operation_id,
            ..Default::default()
        };
        match v.value {
            OrderingValueKind::Float(f) => w.float = Some(f),
            OrderingValueKind::Uint64(u) => w.uint64 = Some(u),
            OrderingValueKind::Date(d) => w.date = Some(d),
            OrderingValueKind::Min => w.min = Some(true),
            OrderingValueKind::Max => w.max = Some(true),
        }
        w
    }
}

impl TryFrom<WirePaging> for Paging {
    type Error = Error;

    fn try_from(w: WirePaging) -> Result<Self> {
        Ok(Paging {
            after_ordering_value: w.after_ordering_value.map(TryInto::try_into).transpose()?,
            before_ordering_value: w.before_ordering_value.map(TryInto::try_into).transpose()?,
            count: w.count,
        })
    }
}

impl From<Paging> for WirePaging {
    fn from(p: Paging) -> Self {
        WirePaging {
            after_ordering_value: p.after_ordering_value.map(Into::into),
            before_ordering_value: p.before_ordering_value.map(Into::into),
            count: p.count,
        }
    }
}

impl TryFrom<WireOrdering> for Ordering {
    type Error = Error;

    fn try_from(w: WireOrdering) -> Result<Self> {
        let value = one_of(
            "Ordering.value",
            vec![
                ("score", w.score.map(|_| OrderingKey::Score)),
                ("operationId", w.operation_id.map(|_| OrderingKey::OperationId)),
                ("field", w.field.map(OrderingKey::Field)),
            ],
        )?;
        Ok(Ordering {
            value,
            ascending: w.ascending,
        })
    }
}

impl From<Ordering> for WireOrdering {
    fn from(o: Ordering) -> Self {
        let mut w = WireOrdering {
            ascending: o.ascending,
            ..Default::default()
        };
        match o.value {
            OrderingKey::Score => w.score = Some(true),
            OrderingKey::OperationId => w.operation_id = Some(true),
            OrderingKey::Field(f) => w.field = Some(f),
        }
        w
    }
}

impl TryFrom<WireTraitFieldPredicate> for TraitFieldPredicate {
    type Error = Error;

    fn try_from(w: WireTraitFieldPredicate) -> Result<Self> {
        let value = one_of(
            "TraitFieldPredicate.value",
            vec![
                ("string", w.string.map(FieldPredicateValue::String)),
                ("int64", w.int64.map(FieldPredicateValue::Int64)),
                ("uint64", w.uint64.map(FieldPredicateValue::Uint64)),
                ("date", w.date.map(FieldPredicateValue::Date)),
            ],
        )?;
        Ok(TraitFieldPredicate {
            field: w.field,
            value,
            operator: Operator::from_wire(w.operator)?,
        })
    }
}

impl From<TraitFieldPredicate> for WireTraitFieldPredicate {
    fn from(p: TraitFieldPredicate) -> Self {
        let mut w = WireTraitFieldPredicate {
            field: p.field,
            operator: p.operator as i32,
            ..Default::default()
        };
        match p.value {
            FieldPredicateValue::String(s) => w.string = Some(s),
            FieldPredicateValue::Int64(i) => w.int64 = Some(i),
            FieldPredicateValue::Uint64(u) => w.uint64 = Some(u),
            FieldPredicateValue::Date(d) => w.date = Some(d),
        }
        w
    }
}

impl TryFrom<WireTraitPredicate> for TraitPredicate {
    type Error = Error;

    fn try_from(w: WireTraitPredicate) -> Result<Self> {
        let query = match w.query {
            None => None,
            Some(q) => Some(one_of(
                "TraitQuery.predicate",
                vec![
                    ("match", q.r#match.map(|m| Ok(TraitQuery::Match(m)))),
                    (
                        "field",
                        q.field
                            .map(|f| TraitFieldPredicate::try_from(f).map(TraitQuery::Field)),
                    ),
                    ("reference", q.reference.map(|r| Ok(TraitQuery::Reference(r)))),
                ],
            )??),
        };
        Ok(TraitPredicate {
            trait_name: w.trait_name,
            query,
        })
    }
}

impl From<TraitPredicate> for WireTraitPredicate {
    fn from(p: TraitPredicate) -> Self {
        let query = p.query.map(|q| match q {
            TraitQuery::Match(m) => WireTraitQuery {
                r#match: Some(m),
                ..Default::default()
            },
            TraitQuery::Field(f) => WireTraitQuery {
                field: Some(f.into()),
                ..Default::default()
            },
            TraitQuery::Reference(r) => WireTraitQuery {
                reference: Some(r),
                ..Default::default()
            },
        });
        WireTraitPredicate {
            trait_name: p.trait_name,
            query,
        }
    }
}

impl TryFrom<WireEntityQuery> for EntityQuery {
    type Error = Error;

    fn try_from(w: WireEntityQuery) -> Result<Self> {
        let predicate = one_of(
            "EntityQuery.predicate",
            vec![
                ("match", w.r#match.map(|m| Ok(Predicate::Match(m)))),
                (
                    "trait",
                    w.r#trait
                        .map(|t| TraitPredicate::try_from(t).map(Predicate::Trait)),
                ),
                ("ids", w.ids.map(|i| Ok(Predicate::Ids(i)))),
                ("reference", w.reference.map(|r| Ok(Predicate::Reference(r)))),
                ("operations", w.operations.map(|o| Ok(Predicate::Operations(o)))),
                ("all", w.all.map(|a| Ok(Predicate::All(a)))),
                ("test", w.test.map(|t| Ok(Predicate::Test(t)))),
            ],
        )??;
        Ok(EntityQuery {
            predicate,
            paging: w.paging.map(TryInto::try_into).transpose()?,
            ordering: w.ordering.map(TryInto::try_into).transpose()?,
            summary: w.summary,
            watch_token: nonzero(w.watch_token),
            result_hash: nonzero(w.result_hash),
            include_deleted: w.include_deleted,
        })
    }
}

impl From<EntityQuery> for WireEntityQuery {
    fn from(q: EntityQuery) -> Self {
        let mut w = WireEntityQuery {
            paging: q.paging.map(Into::into),
            ordering: q.ordering.map(Into::into),
            summary: q.summary,
            watch_token: q.watch_token.unwrap_or(0),
            result_hash: q.result_hash.unwrap_or(0),
            include_deleted: q.include_deleted,
            ..Default::default()
        };
        match q.predicate {
            Predicate::Match(m) => w.r#match = Some(m),
            Predicate::Trait(t) => w.r#trait = Some(t.into()),
            Predicate::Ids(i) => w.ids = Some(i),
            Predicate::Reference(r) => w.reference = Some(r),
            Predicate::Operations(o) => w.operations = Some(o),
            Predicate::All(a) => w.all = Some(a),
            Predicate::Test(t) => w.test = Some(t),
        }
        w
    }
}

impl ResultSource {
    /// Decode a wire value; unknown values map to `Unknown`
    pub fn from_wire(value: i32) -> Self {
        match value {
            1 => ResultSource::Pending,
            2 => ResultSource::Chain,
            _ => ResultSource::Unknown,
        }
    }
}

impl TryFrom<WireEntityResult> for EntityResult {
    type Error = Error;

    fn try_from(w: WireEntityResult) -> Result<Self> {
        Ok(EntityResult {
            entity: w
                .entity
                .ok_or_else(|| Error::validation("EntityResult: missing entity"))?,
            source: ResultSource::from_wire(w.source),
            ordering_value: w
                .ordering_value
                .ok_or_else(|| Error::validation("EntityResult: missing ordering value"))?
                .try_into()?,
        })
    }
}

impl From<EntityResult> for WireEntityResult {
    fn from(r: EntityResult) -> Self {
        WireEntityResult {
            entity: Some(r.entity),
            source: r.source as i32,
            ordering_value: Some(r.ordering_value.into()),
        }
    }
}

impl TryFrom<WireEntityResults> for EntityResults {
    type Error = Error;

    fn try_from(w: WireEntityResults) -> Result<Self> {
        Ok(EntityResults {
            entities: w
                .entities
                .into_iter()
                .map(EntityResult::try_from)
                .collect::<Result<Vec<_>>>()?,
            summary: w.summary,
            estimated_count: w.estimated_count,
            current_page: w.current_page.map(TryInto::try_into).transpose()?,
            next_page: w.next_page.map(TryInto::try_into).transpose()?,
            hash: w.hash,
        })
    }
}

impl From<EntityResults> for WireEntityResults {
    fn from(r: EntityResults) -> Self {
        WireEntityResults {
            entities: r.entities.into_iter().map(Into::into).collect(),
            summary: r.summary,
            estimated_count: r.estimated_count,
            current_page: r.current_page.map(Into::into),
            next_page: r.next_page.map(Into::into),
            hash: r.hash,
        }
    }
}

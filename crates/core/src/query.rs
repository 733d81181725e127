//! Query types
//!
//! This module defines:
//! - EntityQuery: predicate + paging + ordering + watch/hash options
//! - Predicate / TraitQuery: the predicate language
//! - Ordering / OrderingValue: ordering keys and their total order
//! - Paging: cursor-based paging bounds
//! - EntityResults / EntityResult: query responses
//!
//! ## Total order of ordering values
//!
//! `Min` < every concrete value < `Max`. Concrete values compare by kind
//! (`Float` < `Uint64` < `Date`) and then by value, floats with
//! `f64::total_cmp`. Equal values are tie-broken by `operation_id`, so no two
//! results of one query ever compare equal.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::types::{EntityId, OperationId, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;

/// Token identifying a registered watch query
pub type WatchToken = u64;

/// Entity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    /// Which entities to return
    pub predicate: Predicate,
    /// Page bounds and size
    #[serde(default)]
    pub paging: Option<Paging>,
    /// Result order; a predicate-dependent default applies when absent
    #[serde(default)]
    pub ordering: Option<Ordering>,
    /// Return entities without trait payloads
    #[serde(default)]
    pub summary: bool,
    /// Register the query for push re-evaluation
    #[serde(default)]
    pub watch_token: Option<WatchToken>,
    /// Hash of the results the caller already holds
    #[serde(default)]
    pub result_hash: Option<u64>,
    /// Include tombstoned entities and traits
    #[serde(default)]
    pub include_deleted: bool,
}

impl EntityQuery {
    /// Query with the given predicate and default options
    pub fn new(predicate: Predicate) -> Self {
        EntityQuery {
            predicate,
            paging: None,
            ordering: None,
            summary: false,
            watch_token: None,
            result_hash: None,
            include_deleted: false,
        }
    }

    /// Full-text query across all text fields
    pub fn matches(query: impl Into<String>) -> Self {
        Self::new(Predicate::Match(MatchPredicate {
            query: query.into(),
        }))
    }

    /// Entities having a trait of the given type
    pub fn with_trait(trait_name: impl Into<String>) -> Self {
        Self::new(Predicate::Trait(TraitPredicate {
            trait_name: trait_name.into(),
            query: None,
        }))
    }

    /// Entities having a trait of the given type matching `query`
    pub fn with_trait_query(trait_name: impl Into<String>, query: TraitQuery) -> Self {
        Self::new(Predicate::Trait(TraitPredicate {
            trait_name: trait_name.into(),
            query: Some(query),
        }))
    }

    /// Entities by id
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        Self::new(Predicate::Ids(IdsPredicate {
            ids: ids.into_iter().map(Into::into).collect(),
        }))
    }

    /// Entities with a reference field pointing at `reference`
    pub fn referencing(reference: Reference) -> Self {
        Self::new(Predicate::Reference(ReferencePredicate {
            reference,
            field: String::new(),
        }))
    }

    /// Entities touched by the given operations
    pub fn operations(operation_ids: impl Into<Vec<OperationId>>) -> Self {
        Self::new(Predicate::Operations(OperationsPredicate {
            operation_ids: operation_ids.into(),
        }))
    }

    /// All entities
    pub fn all() -> Self {
        Self::new(Predicate::All(AllPredicate {}))
    }

    /// Harness-only predicate
    pub fn test(success: bool) -> Self {
        Self::new(Predicate::Test(TestPredicate { success }))
    }

    /// Builder: set paging
    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    /// Builder: set page size only
    pub fn with_count(mut self, count: u32) -> Self {
        self.paging.get_or_insert_with(Paging::default).count = count;
        self
    }

    /// Builder: set ordering
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Builder: request summary results
    pub fn summary(mut self) -> Self {
        self.summary = true;
        self
    }

    /// Builder: register as a watched query
    pub fn with_watch_token(mut self, token: WatchToken) -> Self {
        self.watch_token = Some(token);
        self
    }

    /// Builder: hash of the results already held by the caller
    pub fn with_result_hash(mut self, hash: u64) -> Self {
        self.result_hash = Some(hash);
        self
    }

    /// Builder: include tombstoned entities
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Structural validation
    pub fn validate(&self) -> Result<()> {
        self.predicate.validate()?;
        if let Some(Ordering {
            value: OrderingKey::Field(field),
            ..
        }) = &self.ordering
        {
            if field.is_empty() {
                return Err(Error::validation("ordering field name is empty"));
            }
        }
        if let Some(paging) = &self.paging {
            paging.validate()?;
        }
        Ok(())
    }
}

/// Query predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Free text over every text-indexed field
    Match(MatchPredicate),
    /// By trait type, optionally with a nested trait query
    Trait(TraitPredicate),
    /// By entity id
    Ids(IdsPredicate),
    /// By reference to an entity or trait
    Reference(ReferencePredicate),
    /// Entities touched by operations
    Operations(OperationsPredicate),
    /// Everything
    All(AllPredicate),
    /// Harness-only
    Test(TestPredicate),
}

impl Predicate {
    /// Variant name, for logs and plans
    pub fn kind(&self) -> &'static str {
        match self {
            Predicate::Match(_) => "match",
            Predicate::Trait(_) => "trait",
            Predicate::Ids(_) => "ids",
            Predicate::Reference(_) => "reference",
            Predicate::Operations(_) => "operations",
            Predicate::All(_) => "all",
            Predicate::Test(_) => "test",
        }
    }

    /// Whether results carry a text relevance score
    pub fn is_scored(&self) -> bool {
        matches!(
            self,
            Predicate::Match(_)
                | Predicate::Trait(TraitPredicate {
                    query: Some(TraitQuery::Match(_)),
                    ..
                })
        )
    }

    fn validate(&self) -> Result<()> {
        match self {
            Predicate::Match(m) => {
                if m.query.trim().is_empty() {
                    return Err(Error::validation("match predicate has an empty query"));
                }
            }
            Predicate::Trait(t) => {
                if t.trait_name.is_empty() {
                    return Err(Error::validation("trait predicate has an empty trait name"));
                }
                match &t.query {
                    Some(TraitQuery::Match(m)) if m.query.trim().is_empty() => {
                        return Err(Error::validation("trait match predicate has an empty query"));
                    }
                    Some(TraitQuery::Field(f)) if f.field.is_empty() => {
                        return Err(Error::validation("field predicate has an empty field name"));
                    }
                    Some(TraitQuery::Reference(r)) if r.field.is_empty() => {
                        return Err(Error::validation(
                            "field reference predicate has an empty field name",
                        ));
                    }
                    Some(TraitQuery::Reference(r)) if r.reference.entity_id.is_empty() => {
                        return Err(Error::validation("reference has an empty entity id"));
                    }
                    _ => {}
                }
            }
            Predicate::Reference(r) => {
                if r.reference.entity_id.is_empty() {
                    return Err(Error::validation("reference has an empty entity id"));
                }
            }
            Predicate::Test(t) => {
                if !t.success {
                    return Err(Error::validation("test predicate requested failure"));
                }
            }
            Predicate::Ids(_) | Predicate::Operations(_) | Predicate::All(_) => {}
        }
        Ok(())
    }
}

/// Free-text predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPredicate {
    /// Query text
    pub query: String,
}

/// Trait type predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitPredicate {
    /// Message type name of the trait
    pub trait_name: String,
    /// Optional filter on the trait's content
    #[serde(default)]
    pub query: Option<TraitQuery>,
}

/// Filter on the content of a trait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraitQuery {
    /// Free text over the trait's text fields
    Match(MatchPredicate),
    /// Field comparison
    Field(TraitFieldPredicate),
    /// Field is a reference to the given target
    Reference(TraitFieldReferencePredicate),
}

/// Comparison of one trait field against a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitFieldPredicate {
    /// Field name
    pub field: String,
    /// Value to compare with
    pub value: FieldPredicateValue,
    /// Comparison operator
    #[serde(default)]
    pub operator: Operator,
}

impl TraitFieldPredicate {
    /// Predicate `field <op> value`
    pub fn new(field: impl Into<String>, operator: Operator, value: FieldPredicateValue) -> Self {
        TraitFieldPredicate {
            field: field.into(),
            value,
            operator,
        }
    }

    /// Predicate `field == value`
    pub fn equal(field: impl Into<String>, value: FieldPredicateValue) -> Self {
        Self::new(field, Operator::Equal, value)
    }
}

/// Typed comparison value of a field predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldPredicateValue {
    /// String value
    String(String),
    /// Signed integer
    Int64(i64),
    /// Unsigned integer
    Uint64(u64),
    /// UTC timestamp
    Date(DateTime<Utc>),
}

/// Field comparison operator; discriminants are the wire values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum Operator {
    /// `==`
    #[default]
    Equal = 0,
    /// `>`
    Gt = 1,
    /// `>=`
    Gte = 2,
    /// `<`
    Lt = 3,
    /// `<=`
    Lte = 4,
}

impl Operator {
    /// Whether `field_value.cmp(predicate_value) == ord` satisfies the operator
    pub fn accepts(self, ord: CmpOrdering) -> bool {
        match self {
            Operator::Equal => ord == CmpOrdering::Equal,
            Operator::Gt => ord == CmpOrdering::Greater,
            Operator::Gte => ord != CmpOrdering::Less,
            Operator::Lt => ord == CmpOrdering::Less,
            Operator::Lte => ord != CmpOrdering::Greater,
        }
    }

    /// Decode a wire value
    pub fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Operator::Equal),
            1 => Ok(Operator::Gt),
            2 => Ok(Operator::Gte),
            3 => Ok(Operator::Lt),
            4 => Ok(Operator::Lte),
            other => Err(Error::validation(format!("unknown operator {}", other))),
        }
    }
}

/// Trait field holds a reference to the given target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitFieldReferencePredicate {
    /// Reference field name
    pub field: String,
    /// Target; an empty trait id accepts any trait of the entity
    pub reference: Reference,
}

/// Entities by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdsPredicate {
    /// Entity ids
    pub ids: Vec<EntityId>,
}

/// Entities having any trait field referencing the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePredicate {
    /// Target; an empty trait id accepts any trait of the entity
    pub reference: Reference,
    /// Restrict to this field name; empty means any field
    #[serde(default)]
    pub field: String,
}

/// Entities touched by any of the operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationsPredicate {
    /// Operation ids
    pub operation_ids: Vec<OperationId>,
}

/// Matches every entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllPredicate {}

/// Harness-only predicate echoing a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestPredicate {
    /// Whether evaluation should succeed
    pub success: bool,
}

/// Primary ordering key and direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    /// Primary key
    pub value: OrderingKey,
    /// Direction
    #[serde(default)]
    pub ascending: bool,
}

impl Ordering {
    /// Order by text relevance
    pub fn score(ascending: bool) -> Self {
        Ordering {
            value: OrderingKey::Score,
            ascending,
        }
    }

    /// Order by last operation id
    pub fn operation_id(ascending: bool) -> Self {
        Ordering {
            value: OrderingKey::OperationId,
            ascending,
        }
    }

    /// Order by a named field value
    pub fn field(name: impl Into<String>, ascending: bool) -> Self {
        Ordering {
            value: OrderingKey::Field(name.into()),
            ascending,
        }
    }
}

/// Primary ordering key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderingKey {
    /// Text relevance score
    Score,
    /// Last operation id of the entity
    OperationId,
    /// Value of the named field
    Field(String),
}

/// Typed ordering value of one result
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderingValue {
    /// Primary key value
    pub value: OrderingValueKind,
    /// Tie-breaker
    pub operation_id: OperationId,
}

/// Primary key value variants
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OrderingValueKind {
    /// Floating point (scores, signed and float fields)
    Float(f64),
    /// Unsigned integer (operation ids, unsigned fields)
    Uint64(u64),
    /// Timestamp
    Date(DateTime<Utc>),
    /// Below every value
    Min,
    /// Above every value
    Max,
}

impl OrderingValueKind {
    fn rank(&self) -> u8 {
        match self {
            OrderingValueKind::Min => 0,
            OrderingValueKind::Float(_) => 1,
            OrderingValueKind::Uint64(_) => 2,
            OrderingValueKind::Date(_) => 3,
            OrderingValueKind::Max => 4,
        }
    }

    fn cmp_total(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (OrderingValueKind::Float(a), OrderingValueKind::Float(b)) => a.total_cmp(b),
            (OrderingValueKind::Uint64(a), OrderingValueKind::Uint64(b)) => a.cmp(b),
            (OrderingValueKind::Date(a), OrderingValueKind::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl OrderingValue {
    /// Unbounded lower cursor
    pub fn min() -> Self {
        OrderingValue {
            value: OrderingValueKind::Min,
            operation_id: 0,
        }
    }

    /// Unbounded upper cursor
    pub fn max() -> Self {
        OrderingValue {
            value: OrderingValueKind::Max,
            operation_id: 0,
        }
    }

    /// Float value
    pub fn float(value: f64, operation_id: OperationId) -> Self {
        OrderingValue {
            value: OrderingValueKind::Float(value),
            operation_id,
        }
    }

    /// Unsigned value
    pub fn uint64(value: u64, operation_id: OperationId) -> Self {
        OrderingValue {
            value: OrderingValueKind::Uint64(value),
            operation_id,
        }
    }

    /// Date value
    pub fn date(value: DateTime<Utc>, operation_id: OperationId) -> Self {
        OrderingValue {
            value: OrderingValueKind::Date(value),
            operation_id,
        }
    }

    /// Whether this is a `Min`/`Max` sentinel
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self.value,
            OrderingValueKind::Min | OrderingValueKind::Max
        )
    }
}

impl PartialEq for OrderingValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for OrderingValue {}

impl PartialOrd for OrderingValue {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderingValue {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.value
            .cmp_total(&other.value)
            .then(self.operation_id.cmp(&other.operation_id))
    }
}

/// Cursor-based paging
///
/// Bounds are exclusive and expressed in the value space of the ordering:
/// results satisfy `after < value < before` regardless of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Paging {
    /// Exclusive lower bound
    #[serde(default)]
    pub after_ordering_value: Option<OrderingValue>,
    /// Exclusive upper bound
    #[serde(default)]
    pub before_ordering_value: Option<OrderingValue>,
    /// Page size; 0 selects the store default
    #[serde(default)]
    pub count: u32,
}

impl Paging {
    /// First page of the given size
    pub fn with_count(count: u32) -> Self {
        Paging {
            count,
            ..Default::default()
        }
    }

    /// Whether `value` lies strictly between the bounds
    pub fn contains(&self, value: &OrderingValue) -> bool {
        self.after_ordering_value.map_or(true, |after| *value > after)
            && self.before_ordering_value.map_or(true, |before| *value < before)
    }

    fn validate(&self) -> Result<()> {
        if let (Some(after), Some(before)) = (self.after_ordering_value, self.before_ordering_value)
        {
            if after >= before {
                return Err(Error::validation(
                    "paging lower bound is not below its upper bound",
                ));
            }
        }
        Ok(())
    }
}

/// Where a result's state comes from; discriminants are the wire values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum ResultSource {
    /// Unknown
    #[default]
    Unknown = 0,
    /// Applied but not yet durably committed
    Pending = 1,
    /// Committed
    Chain = 2,
}

/// One query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    /// The entity (payloads stripped in summary results)
    pub entity: Entity,
    /// Pending or committed
    pub source: ResultSource,
    /// Value the result was ranked by
    pub ordering_value: OrderingValue,
}

/// Query response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityResults {
    /// Results of the current page, in order
    pub entities: Vec<EntityResult>,
    /// Entities are summaries, or omitted because the caller's hash matched
    pub summary: bool,
    /// Matching entities before paging
    pub estimated_count: u32,
    /// Paging that produced this page
    pub current_page: Option<Paging>,
    /// Paging for the following page; `None` when exhausted
    pub next_page: Option<Paging>,
    /// Content hash of the full (non-summary) page
    pub hash: u64,
}

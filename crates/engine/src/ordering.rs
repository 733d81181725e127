//! Ordering and paging
//!
//! Every result gets an `OrderingValue` made of the primary key (score,
//! operation id or field value) and the entity's last operation id as
//! tie-breaker. Operation ids belong to exactly one entity, so two results of
//! one query never compare equal and the order is total.
//!
//! Paging bounds live in value space: a page holds the results strictly
//! between `after` and `before`, whatever the direction. Walking forward
//! moves `after` (ascending) or `before` (descending) to the last value
//! returned.

use crate::planner::Candidate;
use exocore_core::{
    Error, FieldValue, Ordering, OrderingKey, OrderingValue, OrderingValueKind, Paging, Predicate,
    Result, SchemaRegistry,
};
use exocore_storage::EntityRecord;

/// Candidate with its ordering value
#[derive(Debug, Clone)]
pub struct Ranked {
    /// Entity state
    pub record: EntityRecord,
    /// Position in the total order
    pub value: OrderingValue,
}

/// One page of ranked results
#[derive(Debug, Clone)]
pub struct Page {
    /// Results in requested order
    pub items: Vec<Ranked>,
    /// Matching results before paging
    pub estimated_count: u32,
    /// Effective paging of this page, count resolved
    pub current_page: Paging,
    /// Paging of the following page, `None` once exhausted
    pub next_page: Option<Paging>,
}

/// Ordering used when a query does not specify one
///
/// Scored predicates rank by descending relevance, everything else by most
/// recent operation first.
pub fn default_ordering(predicate: &Predicate) -> Ordering {
    if predicate.is_scored() {
        Ordering::score(false)
    } else {
        Ordering::operation_id(false)
    }
}

/// Ordering value of a candidate
///
/// `trait_type` scopes field lookups to traits of that message type.
pub fn ordering_value(
    candidate: &Candidate,
    ordering: &Ordering,
    trait_type: Option<&str>,
    include_deleted: bool,
    schemas: &SchemaRegistry,
) -> Result<OrderingValue> {
    let record = &candidate.record;
    let op = record.last_operation_id;
    match &ordering.value {
        OrderingKey::OperationId => Ok(OrderingValue::uint64(op, op)),
        OrderingKey::Score => Ok(OrderingValue::float(
            candidate.score.map_or(0.0, f64::from),
            op,
        )),
        OrderingKey::Field(field) => field_value(record, field, trait_type, include_deleted, schemas),
    }
}

fn field_value(
    record: &EntityRecord,
    field: &str,
    trait_type: Option<&str>,
    include_deleted: bool,
    schemas: &SchemaRegistry,
) -> Result<OrderingValue> {
    let op = record.last_operation_id;
    let found = record
        .visible_traits(include_deleted)
        .filter_map(|t| t.r#trait.message.as_ref())
        .filter(|m| trait_type.map_or(true, |t| m.type_name == t))
        .find_map(|m| m.get(field).map(|v| (m.type_name.as_str(), v)));

    let Some((type_name, value)) = found else {
        return Ok(OrderingValue {
            value: OrderingValueKind::Min,
            operation_id: op,
        });
    };

    Ok(match value {
        FieldValue::Uint64(v) => OrderingValue::uint64(*v, op),
        FieldValue::Int64(v) => OrderingValue::float(*v as f64, op),
        FieldValue::Float(v) => OrderingValue::float(*v, op),
        FieldValue::Date(v) => OrderingValue::date(*v, op),
        other if schemas.get(type_name).is_some() => {
            return Err(Error::validation(format!(
                "cannot order by {}.{} of type {}",
                type_name,
                field,
                other.type_name()
            )));
        }
        _ => OrderingValue {
            value: OrderingValueKind::Min,
            operation_id: op,
        },
    })
}

/// Rank every candidate
pub fn rank(
    candidates: impl IntoIterator<Item = Candidate>,
    ordering: &Ordering,
    trait_type: Option<&str>,
    include_deleted: bool,
    schemas: &SchemaRegistry,
) -> Result<Vec<Ranked>> {
    let mut ranked = candidates
        .into_iter()
        .map(|candidate| {
            let value = ordering_value(&candidate, ordering, trait_type, include_deleted, schemas)?;
            Ok(Ranked {
                record: candidate.record,
                value,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    ranked.sort_by(|a, b| a.value.cmp(&b.value));
    if !ordering.ascending {
        ranked.reverse();
    }
    Ok(ranked)
}

/// Resolve the page size of a request
pub fn page_size(paging: Option<&Paging>, default_size: u32, max_size: u32) -> u32 {
    match paging.map_or(0, |p| p.count) {
        0 => default_size.min(max_size),
        n => n.min(max_size),
    }
}

/// Cut one page out of results ranked by `rank`
pub fn paginate(
    ranked: Vec<Ranked>,
    ascending: bool,
    paging: Option<&Paging>,
    default_size: u32,
    max_size: u32,
) -> Page {
    let count = page_size(paging, default_size, max_size);
    let current_page = Paging {
        count,
        ..paging.copied().unwrap_or_default()
    };
    let estimated_count = u32::try_from(ranked.len()).unwrap_or(u32::MAX);

    let mut window = ranked
        .into_iter()
        .filter(|r| current_page.contains(&r.value));
    let items: Vec<Ranked> = window.by_ref().take(count as usize).collect();
    let exhausted = window.next().is_none();

    let next_page = match items.last() {
        Some(last) if !exhausted => Some(if ascending {
            Paging {
                after_ordering_value: Some(last.value),
                ..current_page
            }
        } else {
            Paging {
                before_ordering_value: Some(last.value),
                ..current_page
            }
        }),
        _ => None,
    };

    Page {
        items,
        estimated_count,
        current_page,
        next_page,
    }
}

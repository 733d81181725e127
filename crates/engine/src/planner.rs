//! Query planner and predicate evaluator
//!
//! A predicate is turned into a `QueryPlan`: one access path picking the
//! narrowest index for the predicate, plus an optional per-trait filter for
//! the parts the index cannot answer. Executing the plan yields candidate
//! entities (with a relevance score for text queries). Evaluation is pure:
//! it reads the trait index and the mutation log and changes neither.

use exocore_core::{
    EntityId, EntityQuery, Error, FieldPredicateValue, OperationId, Operator, Predicate,
    Reference, Result, SchemaRegistry, TraitQuery, TraitRef,
};
use exocore_durability::MutationLog;
use exocore_search::tokenize;
use exocore_storage::{field_matches, EntityRecord, TraitIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// How candidates are fetched
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// No candidates
    Nothing,
    /// Direct entity lookup
    Ids(Vec<EntityId>),
    /// Log reverse lookup, operation → entity
    Operations(Vec<OperationId>),
    /// Reference index
    References {
        /// Referenced entity, and trait if not empty
        reference: Reference,
        /// Referencing field, any if empty
        field: String,
    },
    /// Trait-type index
    TraitType(String),
    /// Field value index
    FieldIndex {
        /// Message type
        type_name: String,
        /// Indexed field
        field: String,
        /// Comparison
        operator: Operator,
        /// Comparison value
        value: FieldPredicateValue,
    },
    /// Text index
    Text(String),
    /// Every entity
    FullScan,
}

/// Per-trait condition applied to fetched candidates
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Keep everything
    None,
    /// Trait must be of this type
    TraitType(String),
    /// Trait must be of this type and satisfy the field comparison
    Field {
        /// Message type
        type_name: String,
        /// Field name
        field: String,
        /// Comparison
        operator: Operator,
        /// Comparison value
        value: FieldPredicateValue,
    },
    /// Trait must be of this type and reference the target through `field`
    Reference {
        /// Message type
        type_name: String,
        /// Reference field
        field: String,
        /// Referenced entity, and trait if not empty
        reference: Reference,
    },
}

/// Executable plan of a query
#[derive(Clone, PartialEq)]
pub struct QueryPlan {
    /// Candidate access path
    pub access: Access,
    /// Filter on candidate traits
    pub filter: Filter,
    /// Trait type results are scoped to, for field ordering
    pub trait_type: Option<String>,
    /// Whether tombstones are candidates
    pub include_deleted: bool,
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.access {
            Access::Nothing => write!(f, "Nothing")?,
            Access::Ids(ids) => write!(f, "Ids({})", ids.len())?,
            Access::Operations(ops) => write!(f, "Operations({})", ops.len())?,
            Access::References { reference, field } => write!(
                f,
                "References({}/{} via {:?})",
                reference.entity_id, reference.trait_id, field
            )?,
            Access::TraitType(t) => write!(f, "TraitType({})", t)?,
            Access::FieldIndex {
                type_name,
                field,
                operator,
                ..
            } => write!(f, "FieldIndex({}.{} {:?})", type_name, field, operator)?,
            Access::Text(q) => write!(f, "Text({:?})", q)?,
            Access::FullScan => write!(f, "FullScan")?,
        }
        match &self.filter {
            Filter::None => {}
            Filter::TraitType(t) => write!(f, " -> Type({})", t)?,
            Filter::Field {
                type_name,
                field,
                operator,
                ..
            } => write!(f, " -> Field({}.{} {:?})", type_name, field, operator)?,
            Filter::Reference {
                type_name, field, ..
            } => write!(f, " -> Reference({}.{})", type_name, field)?,
        }
        if self.include_deleted {
            write!(f, " +deleted")?;
        }
        Ok(())
    }
}

/// Candidate entity produced by a plan
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Materialized entity state
    pub record: EntityRecord,
    /// Relevance score, for text plans
    pub score: Option<f32>,
}

/// Build the plan of a query
pub fn plan(query: &EntityQuery, schemas: &SchemaRegistry) -> Result<QueryPlan> {
    let include_deleted = query.include_deleted;
    let mut trait_type = None;

    let (access, filter) = match &query.predicate {
        Predicate::Match(m) => (Access::Text(usable_query(&m.query)?), Filter::None),
        Predicate::Ids(p) => (Access::Ids(p.ids.clone()), Filter::None),
        Predicate::Operations(p) => (Access::Operations(p.operation_ids.clone()), Filter::None),
        Predicate::Reference(p) => (
            Access::References {
                reference: p.reference.clone(),
                field: p.field.clone(),
            },
            Filter::None,
        ),
        Predicate::All(_) => (Access::FullScan, Filter::None),
        Predicate::Test(_) => (Access::Nothing, Filter::None),
        Predicate::Trait(p) => {
            let type_name = p.trait_name.clone();
            trait_type = Some(type_name.clone());
            match &p.query {
                None => (Access::TraitType(type_name), Filter::None),
                Some(TraitQuery::Match(m)) => (
                    Access::Text(usable_query(&m.query)?),
                    Filter::TraitType(type_name),
                ),
                Some(TraitQuery::Field(f)) => {
                    let indexed = schemas
                        .field_options(&type_name, &f.field)
                        .map_or(false, |o| o.has_value_index());
                    if indexed {
                        (
                            Access::FieldIndex {
                                type_name,
                                field: f.field.clone(),
                                operator: f.operator,
                                value: f.value.clone(),
                            },
                            Filter::None,
                        )
                    } else {
                        tracing::debug!(
                            target: "exocore::query",
                            type_name = %type_name,
                            field = %f.field,
                            "Field predicate without value index, filtering trait type"
                        );
                        (
                            Access::TraitType(type_name.clone()),
                            Filter::Field {
                                type_name,
                                field: f.field.clone(),
                                operator: f.operator,
                                value: f.value.clone(),
                            },
                        )
                    }
                }
                Some(TraitQuery::Reference(r)) => (
                    Access::References {
                        reference: r.reference.clone(),
                        field: r.field.clone(),
                    },
                    Filter::Reference {
                        type_name,
                        field: r.field.clone(),
                        reference: r.reference.clone(),
                    },
                ),
            }
        }
    };

    Ok(QueryPlan {
        access,
        filter,
        trait_type,
        include_deleted,
    })
}

fn usable_query(query: &str) -> Result<String> {
    if tokenize(query).is_empty() {
        return Err(Error::validation(format!(
            "match query {:?} has no searchable terms",
            query
        )));
    }
    Ok(query.to_string())
}

/// Execute a plan
///
/// Returns the matching entities keyed by id; a text plan scores each entity
/// with the best score among its matching traits.
pub fn execute(
    plan: &QueryPlan,
    index: &TraitIndex,
    log: &MutationLog,
) -> Result<FxHashMap<EntityId, Candidate>> {
    index.check_available()?;
    let include_deleted = plan.include_deleted;

    let trait_hits: Vec<(TraitRef, Option<f32>)> = match &plan.access {
        Access::Nothing => return Ok(FxHashMap::default()),
        Access::Ids(ids) => return Ok(entity_candidates(index, ids.iter().cloned(), include_deleted)),
        Access::Operations(ops) => {
            let entities = ops.iter().filter_map(|op| log.entity_of(*op));
            return Ok(entity_candidates(index, entities, include_deleted));
        }
        Access::FullScan => {
            return Ok(entity_candidates(
                index,
                index.entity_ids(include_deleted),
                include_deleted,
            ))
        }
        Access::References { reference, field } => index
            .references_to(reference, field, include_deleted)
            .into_iter()
            .map(|r| (r, None))
            .collect(),
        Access::TraitType(type_name) => index
            .traits_of_type(type_name, include_deleted)
            .into_iter()
            .map(|r| (r, None))
            .collect(),
        Access::FieldIndex {
            type_name,
            field,
            operator,
            value,
        } => index
            .field_lookup(type_name, field, *operator, value, include_deleted)
            .into_iter()
            .map(|r| (r, None))
            .collect(),
        Access::Text(query) => index
            .search_text(query, include_deleted)
            .into_iter()
            .map(|(r, score)| (r, Some(score)))
            .collect(),
    };

    let mut records: FxHashMap<EntityId, Option<EntityRecord>> = FxHashMap::default();
    let mut out: FxHashMap<EntityId, Candidate> = FxHashMap::default();
    for (trait_ref, score) in trait_hits {
        let record = records
            .entry(trait_ref.entity_id.clone())
            .or_insert_with(|| {
                index
                    .record(&trait_ref.entity_id)
                    .filter(|r| r.is_visible(include_deleted))
            });
        let Some(record) = record else {
            continue;
        };
        let Some(trait_record) = record.traits.get(&trait_ref.trait_id) else {
            continue;
        };
        if !include_deleted && !trait_record.is_live() {
            continue;
        }
        let Some(message) = trait_record.r#trait.message.as_ref() else {
            continue;
        };
        let keep = match &plan.filter {
            Filter::None => true,
            Filter::TraitType(t) => &message.type_name == t,
            Filter::Field {
                type_name,
                field,
                operator,
                value,
            } => {
                &message.type_name == type_name
                    && message
                        .get(field)
                        .map_or(false, |v| field_matches(v, *operator, value))
            }
            Filter::Reference {
                type_name,
                field,
                reference,
            } => {
                &message.type_name == type_name
                    && message
                        .get(field)
                        .and_then(|v| v.as_reference())
                        .map_or(false, |r| reference.matches(r))
            }
        };
        if !keep {
            continue;
        }

        match out.get_mut(&trait_ref.entity_id) {
            Some(candidate) => {
                if let (Some(best), Some(score)) = (candidate.score.as_mut(), score) {
                    if score > *best {
                        *best = score;
                    }
                }
            }
            None => {
                out.insert(
                    trait_ref.entity_id.clone(),
                    Candidate {
                        record: record.clone(),
                        score,
                    },
                );
            }
        }
    }
    Ok(out)
}

fn entity_candidates(
    index: &TraitIndex,
    ids: impl IntoIterator<Item = EntityId>,
    include_deleted: bool,
) -> FxHashMap<EntityId, Candidate> {
    let mut seen = FxHashSet::default();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .filter_map(|id| {
            index
                .record(&id)
                .filter(|r| r.is_visible(include_deleted))
                .map(|record| (id, Candidate { record, score: None }))
        })
        .collect()
}

//! Entity store service
//!
//! `EntityStore` wires the allocator, the mutation log, the trait index and
//! the watch registry together.
//!
//! # Mutation path
//!
//! For each mutation of a request, under the entity's write lock:
//! validate against the index (existence, CAS), optionally verify a
//! compaction by replaying the log, take an operation id, append to the log,
//! apply to the index. Affected watches are then queued for asynchronous
//! re-evaluation. A fatal error (allocator exhausted, log append refused)
//! halts the mutation path; queries keep working.
//!
//! Index availability is checked right before the append. A `shutdown`
//! racing that window can still leave the last in-flight entry logged but
//! not applied; nothing is applied after shutdown, so the index never runs
//! ahead of the log.
//!
//! # Query path
//!
//! Plan, execute against the index, rank, cut the page, hash. Queries read
//! the latest applied state without taking entity locks.

use crate::config::{IdSource, StoreConfig, CONFIG_FILE_NAME};
use crate::hasher::hash_results;
use crate::ordering::{default_ordering, paginate, rank};
use crate::planner::{execute, plan, QueryPlan};
use crate::watch::{WatchHandle, WatchRegistry};
use crate::workers::{Submitted, WatchWorkers, WorkerStats};
use exocore_concurrency::{EntityLocks, OperationIdAllocator};
use exocore_core::{
    Entity, EntityId, EntityMutation, EntityQuery, EntityResult, EntityResults, Error, Mutation,
    MutationRequest, MutationResult, OperationId, ResultSource, Result, SchemaRegistry,
    TraitSchema, WatchToken,
};
use exocore_durability::{AppendOutcome, CommitStatus, MutationLog};
use exocore_storage::{AppliedMutation, EntityRecord, TraitIndex};
use rustc_hash::FxHashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Store counters snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Entity records, tombstones included
    pub entities: usize,
    /// Log entries, compacted ones included
    pub log_entries: usize,
    /// Last operation id issued or observed
    pub last_operation_id: OperationId,
    /// Registered watches
    pub watches: usize,
    /// Watch worker pool metrics
    pub workers: WorkerStats,
    /// Whether the mutation path is halted
    pub halted: bool,
}

/// Results of a query with every entity it matched before paging
struct Evaluation {
    results: EntityResults,
    matched: FxHashSet<EntityId>,
}

/// State shared with the watch workers
struct StoreCore {
    config: StoreConfig,
    allocator: OperationIdAllocator,
    locks: EntityLocks,
    log: MutationLog,
    index: TraitIndex,
    watches: WatchRegistry,
    halted: AtomicBool,
}

/// Entity mutation and query service
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct EntityStore {
    core: Arc<StoreCore>,
    workers: WatchWorkers,
}

impl EntityStore {
    /// Create an empty store
    pub fn new(config: StoreConfig, schemas: SchemaRegistry) -> Result<Self> {
        config.validate()?;
        let allocator = match config.id_source()? {
            IdSource::Sequential => OperationIdAllocator::default(),
            IdSource::Clock => OperationIdAllocator::from_clock(),
        };
        let log = MutationLog::new(config.commit_mode()?);

        let core = Arc::new(StoreCore {
            allocator,
            locks: EntityLocks::new(),
            log,
            index: TraitIndex::new(schemas),
            watches: WatchRegistry::default(),
            halted: AtomicBool::new(false),
            config,
        });

        let worker_core = Arc::clone(&core);
        let workers = WatchWorkers::new(
            core.config.watch_workers,
            core.config.watch_queue_depth,
            move |token| worker_core.reevaluate(token),
        )?;

        tracing::info!(
            target: "exocore::store",
            id_source = %core.config.id_source,
            commit_mode = %core.config.commit_mode,
            watch_workers = core.config.watch_workers,
            "Opened entity store"
        );
        Ok(EntityStore { core, workers })
    }

    /// Create a store with default configuration
    pub fn with_schemas(schemas: SchemaRegistry) -> Result<Self> {
        Self::new(StoreConfig::default(), schemas)
    }

    /// Create a store configured from `exocore-store.toml` in `dir`
    ///
    /// Writes the default config file first if there is none.
    pub fn from_config_dir(dir: &Path, schemas: SchemaRegistry) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&path)?;
        Self::new(StoreConfig::from_file(&path)?, schemas)
    }

    /// Effective configuration
    pub fn config(&self) -> &StoreConfig {
        &self.core.config
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Apply a batch of mutations in order
    ///
    /// Every mutation is checked structurally before any is applied. The
    /// batch then stops at the first failing mutation; the ones before it
    /// stay applied.
    pub fn mutate(&self, request: MutationRequest) -> Result<MutationResult> {
        self.core.check_not_halted()?;
        for mutation in &request.mutations {
            mutation.validate()?;
        }

        let mut operation_ids = Vec::with_capacity(request.mutations.len());
        for mutation in &request.mutations {
            let applied = self.core.apply_one(mutation)?;
            operation_ids.push(applied.operation_id);
            self.schedule_watches(&applied);
        }

        let entities = if request.return_entities {
            self.resulting_entities(&request.mutations)
        } else {
            Vec::new()
        };
        Ok(MutationResult {
            operation_ids,
            entities,
        })
    }

    /// Apply a single mutation and return its operation id
    pub fn mutate_one(&self, mutation: EntityMutation) -> Result<OperationId> {
        let result = self.mutate(MutationRequest::single(mutation))?;
        result
            .operation_ids
            .first()
            .copied()
            .ok_or_else(|| Error::validation("mutation produced no operation"))
    }

    /// Apply a mutation carrying an operation id assigned elsewhere
    ///
    /// Used to replay a log, in operation id order. An operation already
    /// recorded for the same entity is skipped and `Ok(false)` is returned.
    /// Any other id must be above every id this store has issued or
    /// ingested; the allocator is moved past it before the append, so a
    /// concurrent local mutation can never be handed the same id.
    pub fn ingest(&self, mutation: &EntityMutation, operation_id: OperationId) -> Result<bool> {
        self.core.check_not_halted()?;
        mutation.validate()?;

        let core = &self.core;
        let applied = core.locks.with_entity(&mutation.entity_id, || {
            if core.log.entity_of(operation_id).as_ref() == Some(&mutation.entity_id) {
                return Ok(None);
            }
            core.index.validate(mutation)?;
            if let Mutation::CompactTrait(_) = &mutation.mutation {
                core.verify_compaction(mutation)?;
            }
            core.allocator.claim(operation_id)?;
            match core.log.append(mutation, operation_id) {
                Ok(AppendOutcome::Appended) => {}
                Ok(AppendOutcome::Duplicate) => return Ok(None),
                Err(e) => return Err(core.check_fatal(e)),
            }
            core.index.apply(mutation, operation_id).map(Some)
        })?;

        match applied {
            Some(applied) => {
                self.schedule_watches(&applied);
                Ok(true)
            }
            None => {
                tracing::debug!(
                    target: "exocore::store",
                    operation_id,
                    entity_id = %mutation.entity_id,
                    "Skipped already ingested operation"
                );
                Ok(false)
            }
        }
    }

    fn resulting_entities(&self, mutations: &[EntityMutation]) -> Vec<Entity> {
        let mut seen: Vec<&EntityId> = Vec::new();
        let mut entities = Vec::new();
        for mutation in mutations {
            if seen.contains(&&mutation.entity_id) {
                continue;
            }
            seen.push(&mutation.entity_id);
            if let Some(record) = self.core.index.record(&mutation.entity_id) {
                if record.is_visible(false) {
                    entities.push(record.to_entity(false));
                }
            }
        }
        entities
    }

    /// Mark pending operations up to `operation_id` as committed
    pub fn commit_through(&self, operation_id: OperationId) -> usize {
        self.core.log.commit_through(operation_id)
    }

    /// Mark every pending operation as committed
    pub fn commit_all(&self) -> usize {
        self.core.log.commit_all()
    }

    /// Whether a fatal error halted the mutation path
    pub fn is_halted(&self) -> bool {
        self.core.halted.load(Ordering::Acquire)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Evaluate a query
    ///
    /// A query carrying the token of a registered watch also updates that
    /// watch's query.
    pub fn query(&self, query: &EntityQuery) -> Result<EntityResults> {
        let evaluated_at = self.core.allocator.last_issued();
        let Evaluation { results, matched } = self.core.evaluate(query)?;
        if let Some(token) = query.watch_token {
            if !self
                .core
                .watches
                .refresh(token, query, results.hash, matched, evaluated_at)
            {
                tracing::debug!(
                    target: "exocore::watch",
                    token,
                    "Query carries an unregistered watch token; use watch() to register"
                );
            }
        }
        Ok(results)
    }

    /// Plan of a query, for diagnostics
    pub fn explain(&self, query: &EntityQuery) -> Result<QueryPlan> {
        query.validate()?;
        let schemas = self.core.index.schemas();
        plan(query, &schemas)
    }

    /// Entity state, including tombstoned traits when asked
    pub fn get_entity(&self, entity_id: &EntityId, include_deleted: bool) -> Option<Entity> {
        self.core
            .index
            .record(entity_id)
            .filter(|r| r.is_visible(include_deleted))
            .map(|r| r.to_entity(include_deleted))
    }

    // ========================================================================
    // Watches
    // ========================================================================

    /// Register a query for push re-evaluation
    ///
    /// Uses the query's `watch_token`, or allocates one. The handle starts
    /// with the current results.
    pub fn watch(&self, query: EntityQuery) -> Result<WatchHandle> {
        let token = match query.watch_token {
            Some(token) => token,
            None => self.core.watches.allocate_token(),
        };
        let query = query.with_watch_token(token);
        let evaluated_at = self.core.allocator.last_issued();
        let initial = self.core.evaluate(&query)?;
        Ok(self.core.watches.register(
            token,
            query,
            initial.results,
            initial.matched,
            evaluated_at,
        ))
    }

    /// Remove a watch; its handle sees the channel close
    pub fn unwatch(&self, token: WatchToken) -> bool {
        self.core.watches.unwatch(token)
    }

    /// Wait for every queued watch re-evaluation to finish
    pub fn drain_watches(&self) {
        self.workers.drain();
    }

    fn schedule_watches(&self, applied: &AppliedMutation) {
        for token in self.core.watches.affected(applied, &self.core.log) {
            if self.workers.submit(token) == Submitted::Rejected {
                tracing::warn!(
                    target: "exocore::watch",
                    token,
                    operation_id = applied.operation_id,
                    "Watch queue full, dropped re-evaluation"
                );
            }
        }
    }

    // ========================================================================
    // Schemas and lifecycle
    // ========================================================================

    /// Register a schema, reindexing existing traits of its type
    pub fn register_schema(&self, schema: TraitSchema) {
        self.core.index.register_schema(schema);
    }

    /// Counters snapshot
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entities: self.core.index.len(),
            log_entries: self.core.log.len(),
            last_operation_id: self.core.allocator.last_issued(),
            watches: self.core.watches.len(),
            workers: self.workers.stats(),
            halted: self.is_halted(),
        }
    }

    /// Stop the watch workers and close the index
    ///
    /// Queued re-evaluations finish first. Later calls fail with
    /// `IndexUnavailable`.
    pub fn shutdown(&self) {
        if self.workers.is_shut_down() {
            return;
        }
        self.workers.shutdown();
        self.core.watches.clear();
        self.core.index.close();
        tracing::info!(target: "exocore::store", "Entity store shut down");
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl StoreCore {
    fn check_not_halted(&self) -> Result<()> {
        if self.halted.load(Ordering::Acquire) {
            Err(Error::Halted)
        } else {
            Ok(())
        }
    }

    /// Halt on fatal errors, pass every error through
    fn check_fatal(&self, error: Error) -> Error {
        if error.is_fatal() && !self.halted.swap(true, Ordering::AcqRel) {
            tracing::error!(target: "exocore::store", error = %error, "Mutation path halted");
        }
        error
    }

    fn apply_one(&self, mutation: &EntityMutation) -> Result<AppliedMutation> {
        self.locks.with_entity(&mutation.entity_id, || {
            self.check_not_halted()?;
            self.index.validate(mutation)?;
            if let Mutation::CompactTrait(_) = &mutation.mutation {
                self.verify_compaction(mutation)?;
            }

            let operation_id = self.allocator.next().map_err(|e| self.check_fatal(e))?;
            // a closed index would leave the entry unapplied
            self.index.check_available()?;
            self.log
                .append(mutation, operation_id)
                .map_err(|e| self.check_fatal(e))?;
            let applied = self.index.apply(mutation, operation_id)?;

            if let Mutation::Test(_) = &mutation.mutation {
                tracing::info!(
                    target: "exocore::store",
                    entity_id = %mutation.entity_id,
                    operation_id,
                    "Applied test mutation"
                );
            }
            Ok(applied)
        })
    }

    fn verify_compaction(&self, mutation: &EntityMutation) -> Result<()> {
        let Mutation::CompactTrait(compact) = &mutation.mutation else {
            return Ok(());
        };
        let ops: Vec<OperationId> = compact
            .compacted_operations
            .iter()
            .map(|c| c.operation_id)
            .collect();
        let trait_id = &compact.r#trait.id;
        self.log
            .validate_compaction(&mutation.entity_id, trait_id, &ops)?;
        if !self.config.verify_compaction {
            return Ok(());
        }

        let replayed = self.log.replay_trait(&mutation.entity_id, trait_id, &ops)?;
        let replayed_message = replayed.as_ref().and_then(|t| t.message.as_ref());
        if replayed_message != compact.r#trait.message.as_ref() {
            tracing::warn!(
                target: "exocore::store",
                entity_id = %mutation.entity_id,
                trait_id = %trait_id,
                compacted = ops.len(),
                "Compaction result differs from replayed operations"
            );
            return Err(Error::validation(format!(
                "compaction of {}/{} does not match its operations",
                mutation.entity_id, trait_id
            )));
        }
        Ok(())
    }

    fn evaluate(&self, query: &EntityQuery) -> Result<Evaluation> {
        query.validate()?;
        self.index.check_available()?;

        let query_plan = {
            let schemas = self.index.schemas();
            plan(query, &schemas)?
        };
        tracing::trace!(target: "exocore::query", plan = ?query_plan, "Planned query");

        let candidates = execute(&query_plan, &self.index, &self.log)?;
        let ordering = query
            .ordering
            .clone()
            .unwrap_or_else(|| default_ordering(&query.predicate));
        let ranked = {
            let schemas = self.index.schemas();
            rank(
                candidates.into_values(),
                &ordering,
                query_plan.trait_type.as_deref(),
                query.include_deleted,
                &schemas,
            )?
        };
        let matched: FxHashSet<EntityId> = ranked.iter().map(|r| r.record.id.clone()).collect();
        let page = paginate(
            ranked,
            ordering.ascending,
            query.paging.as_ref(),
            self.config.default_page_size,
            self.config.max_page_size,
        );

        let mut entities: Vec<EntityResult> = page
            .items
            .iter()
            .map(|ranked| EntityResult {
                entity: ranked.record.to_entity(query.include_deleted),
                source: self.source_of(&ranked.record),
                ordering_value: ranked.value,
            })
            .collect();
        let hash = hash_results(&entities)?;

        let mut summary = false;
        if query.result_hash == Some(hash) {
            entities.clear();
            summary = true;
        } else if query.summary {
            for result in &mut entities {
                result.entity = result.entity.summary();
            }
            summary = true;
        }

        tracing::debug!(
            target: "exocore::query",
            predicate = query.predicate.kind(),
            matched = page.estimated_count,
            returned = entities.len(),
            hash,
            "Evaluated query"
        );

        Ok(Evaluation {
            results: EntityResults {
                entities,
                summary,
                estimated_count: page.estimated_count,
                current_page: Some(page.current_page),
                next_page: page.next_page,
                hash,
            },
            matched,
        })
    }

    fn source_of(&self, record: &EntityRecord) -> ResultSource {
        match self.log.status(record.last_operation_id) {
            Some(CommitStatus::Chain) => ResultSource::Chain,
            Some(CommitStatus::Pending) => ResultSource::Pending,
            None => ResultSource::Unknown,
        }
    }

    fn reevaluate(&self, token: WatchToken) {
        let Some(query) = self.watches.query(token) else {
            return;
        };
        let evaluated_at = self.allocator.last_issued();
        match self.evaluate(&query) {
            Ok(Evaluation { results, matched }) => {
                self.watches.deliver(token, results, matched, evaluated_at);
            }
            Err(e) => {
                tracing::warn!(
                    target: "exocore::watch",
                    token,
                    error = %e,
                    "Watch re-evaluation failed"
                );
            }
        }
    }
}

//! Watch registry
//!
//! A watched query is stored with the hash of the results last delivered and
//! the sending half of a `tokio::sync::watch` channel. After a mutation is
//! applied, every watch whose scope the mutation could affect is queued for
//! re-evaluation; fresh results are sent only if their hash changed. Besides
//! the predicate's own scope, a mutation of any entity the query matched at
//! its last evaluation is in scope: its other traits and its last operation
//! id are part of the results.
//!
//! A watch is removed by `unwatch`, or lazily once every receiver of its
//! channel has been dropped.

use dashmap::DashMap;
use exocore_core::{
    EntityId, EntityQuery, EntityResults, OperationId, Predicate, WatchToken,
};
use exocore_durability::MutationLog;
use exocore_storage::AppliedMutation;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Receiving side of a watched query
///
/// Holds the latest results; the initial value is the result of the query at
/// registration time.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    token: WatchToken,
    receiver: watch::Receiver<Arc<EntityResults>>,
}

impl WatchHandle {
    /// Token of the watch
    pub fn token(&self) -> WatchToken {
        self.token
    }

    /// Latest delivered results, marking them seen
    pub fn latest(&mut self) -> Arc<EntityResults> {
        Arc::clone(&self.receiver.borrow_and_update())
    }

    /// Whether results were delivered since the last `latest`
    ///
    /// Returns `false` once the watch was removed.
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the next delivery
    ///
    /// Returns `None` once the watch was removed.
    pub async fn changed(&mut self) -> Option<Arc<EntityResults>> {
        self.receiver.changed().await.ok()?;
        Some(self.latest())
    }
}

#[derive(Debug)]
struct WatchEntry {
    query: EntityQuery,
    last_hash: u64,
    evaluated_at: OperationId,
    /// Entities matched at the last evaluation, before paging
    matched: FxHashSet<EntityId>,
    sender: watch::Sender<Arc<EntityResults>>,
}

/// Registered watches by token
#[derive(Debug)]
pub struct WatchRegistry {
    watches: DashMap<WatchToken, WatchEntry>,
    next_token: AtomicU64,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        WatchRegistry {
            watches: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }
}

impl WatchRegistry {
    /// Token for a query registered without one
    pub fn allocate_token(&self) -> WatchToken {
        loop {
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            if !self.watches.contains_key(&token) {
                return token;
            }
        }
    }

    /// Register `query` under `token` with its initial results
    ///
    /// Replaces any previous watch with the same token; its receivers see the
    /// channel close.
    pub fn register(
        &self,
        token: WatchToken,
        query: EntityQuery,
        initial: EntityResults,
        matched: FxHashSet<EntityId>,
        evaluated_at: OperationId,
    ) -> WatchHandle {
        let last_hash = initial.hash;
        let (sender, receiver) = watch::channel(Arc::new(initial));
        let replaced = self.watches.insert(
            token,
            WatchEntry {
                query,
                last_hash,
                evaluated_at,
                matched,
                sender,
            },
        );
        tracing::debug!(
            target: "exocore::watch",
            token,
            replaced = replaced.is_some(),
            "Registered watch"
        );
        WatchHandle { token, receiver }
    }

    /// Update the query of an existing watch after a direct query with its token
    ///
    /// Returns `false` if no watch has this token.
    pub fn refresh(
        &self,
        token: WatchToken,
        query: &EntityQuery,
        hash: u64,
        matched: FxHashSet<EntityId>,
        evaluated_at: OperationId,
    ) -> bool {
        match self.watches.get_mut(&token) {
            Some(mut entry) => {
                entry.query = query.clone();
                if evaluated_at >= entry.evaluated_at {
                    entry.last_hash = hash;
                    entry.evaluated_at = evaluated_at;
                    entry.matched = matched;
                }
                true
            }
            None => false,
        }
    }

    /// Remove a watch
    pub fn unwatch(&self, token: WatchToken) -> bool {
        let removed = self.watches.remove(&token).is_some();
        if removed {
            tracing::debug!(target: "exocore::watch", token, "Removed watch");
        }
        removed
    }

    /// Query of a watch, for re-evaluation
    pub fn query(&self, token: WatchToken) -> Option<EntityQuery> {
        self.watches.get(&token).map(|e| e.query.clone())
    }

    /// Deliver re-evaluated results
    ///
    /// Results computed before a later delivery are discarded, and results
    /// with an unchanged hash are not sent. Returns whether results were sent.
    pub fn deliver(
        &self,
        token: WatchToken,
        results: EntityResults,
        matched: FxHashSet<EntityId>,
        evaluated_at: OperationId,
    ) -> bool {
        let Some(mut entry) = self.watches.get_mut(&token) else {
            return false;
        };
        if evaluated_at < entry.evaluated_at {
            return false;
        }
        entry.evaluated_at = evaluated_at;
        entry.matched = matched;
        if results.hash == entry.last_hash {
            return false;
        }
        entry.last_hash = results.hash;
        let hash = results.hash;
        if entry.sender.send(Arc::new(results)).is_err() {
            drop(entry);
            self.watches.remove(&token);
            tracing::debug!(target: "exocore::watch", token, "Watch receiver dropped");
            return false;
        }
        tracing::debug!(target: "exocore::watch", token, hash, "Delivered watch results");
        true
    }

    /// Tokens whose results `applied` could change
    ///
    /// Watches without receivers are removed on the way.
    pub fn affected(&self, applied: &AppliedMutation, log: &MutationLog) -> Vec<WatchToken> {
        let mut closed = Vec::new();
        let mut tokens = Vec::new();
        for entry in self.watches.iter() {
            if entry.sender.is_closed() {
                closed.push(*entry.key());
            } else if entry.matched.contains(&applied.entity_id)
                || in_scope(&entry.query.predicate, applied, log)
            {
                tokens.push(*entry.key());
            }
        }
        for token in closed {
            self.watches.remove(&token);
            tracing::debug!(target: "exocore::watch", token, "Watch receiver dropped");
        }
        tokens
    }

    /// Every registered token
    pub fn tokens(&self) -> Vec<WatchToken> {
        self.watches.iter().map(|e| *e.key()).collect()
    }

    /// Number of registered watches
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether nothing is watched
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Drop every watch, closing their channels
    pub fn clear(&self) {
        self.watches.clear();
    }
}

/// Whether a mutation could change the results of a predicate
pub fn in_scope(predicate: &Predicate, applied: &AppliedMutation, log: &MutationLog) -> bool {
    let entity: &EntityId = &applied.entity_id;
    match predicate {
        Predicate::Ids(p) => p.ids.contains(entity),
        Predicate::Trait(p) => applied.trait_types.iter().any(|t| t == &p.trait_name),
        Predicate::Operations(p) => p
            .operation_ids
            .iter()
            .any(|op| log.entity_of(*op).as_ref() == Some(entity)),
        Predicate::Match(_) | Predicate::Reference(_) | Predicate::All(_) => true,
        Predicate::Test(_) => false,
    }
}

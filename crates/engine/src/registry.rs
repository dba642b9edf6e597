//! The single writer of trigger state.
//!
//! Readers clone snapshots out under a short read lock. Every state change goes
//! through the async writer lock, which is held across the store write so that
//! records are never written concurrently, and is never held across a venue call.
//!
//! Two persistence policies apply:
//! - Control-surface changes (insert, remove) are strict: the store is written first
//!   and memory only changes if that succeeds.
//! - Watcher transitions are applied to memory even when the store write fails. The
//!   trigger is then marked dirty and re-saved before the next mutation, so an order
//!   that already reached the venue is not repeated over a transient disk error.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use trade_guard_core::{
    EngineError, PositionRef, StorageError, Trigger, TriggerCondition, TriggerId, TriggerKind,
    TriggerStore,
};

use crate::evaluator::FireAction;

#[derive(Debug, Default)]
struct Index {
    triggers: HashMap<TriggerId, Trigger>,
    by_position: HashMap<PositionRef, BTreeSet<TriggerId>>,
}

impl Index {
    fn put(&mut self, trigger: Trigger) {
        self.by_position
            .entry(trigger.position_ref.clone())
            .or_default()
            .insert(trigger.id);
        self.triggers.insert(trigger.id, trigger);
    }

    fn take(&mut self, id: &TriggerId) -> Option<Trigger> {
        let trigger = self.triggers.remove(id)?;
        if let Some(ids) = self.by_position.get_mut(&trigger.position_ref) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_position.remove(&trigger.position_ref);
            }
        }
        Some(trigger)
    }
}

fn oldest_first(mut triggers: Vec<Trigger>) -> Vec<Trigger> {
    triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    triggers
}

pub struct TriggerRegistry {
    index: RwLock<Index>,
    store: Arc<dyn TriggerStore>,
    writer: tokio::sync::Mutex<()>,
    dirty: Mutex<HashSet<TriggerId>>,
}

impl TriggerRegistry {
    /// Creates an empty registry backed by `store`. Nothing is read from the store.
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            store,
            writer: tokio::sync::Mutex::new(()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Populates a registry from every record in `store`.
    ///
    /// # Errors
    /// Returns the store's error if the records cannot be listed at all.
    pub async fn load(store: Arc<dyn TriggerStore>) -> Result<Self, StorageError> {
        let triggers = store.load_all().await?;
        let registry = Self::new(store);
        {
            let mut index = registry.index.write();
            for trigger in triggers {
                index.put(trigger);
            }
        }
        let (total, active) = {
            let index = registry.index.read();
            let active = index.triggers.values().filter(|t| !t.is_terminal()).count();
            (index.triggers.len(), active)
        };
        info!(total, active, "Trigger registry loaded");
        Ok(registry)
    }

    #[must_use]
    pub fn get(&self, id: &TriggerId) -> Option<Trigger> {
        self.index.read().triggers.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().triggers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().triggers.is_empty()
    }

    /// All triggers, or only those on `position`, oldest first.
    #[must_use]
    pub fn list(&self, position: Option<&PositionRef>) -> Vec<Trigger> {
        let index = self.index.read();
        let triggers: Vec<Trigger> = match position {
            Some(position) => index
                .by_position
                .get(position)
                .map(|ids| ids.iter().filter_map(|id| index.triggers.get(id).cloned()).collect())
                .unwrap_or_default(),
            None => index.triggers.values().cloned().collect(),
        };
        drop(index);
        oldest_first(triggers)
    }

    /// Non-terminal triggers of `kind`, oldest first.
    #[must_use]
    pub fn active(&self, kind: TriggerKind) -> Vec<Trigger> {
        let triggers = self
            .index
            .read()
            .triggers
            .values()
            .filter(|t| t.kind() == kind && !t.is_terminal())
            .cloned()
            .collect();
        oldest_first(triggers)
    }

    /// Re-checks, right before an order call, that `action` still applies to `id`.
    #[must_use]
    pub fn is_actionable(&self, id: &TriggerId, action: &FireAction) -> bool {
        let index = self.index.read();
        let Some(trigger) = index.triggers.get(id) else {
            return false;
        };
        if trigger.is_terminal() {
            return false;
        }
        match (action, &trigger.condition) {
            (FireAction::SetStopLoss { .. }, TriggerCondition::Breakeven { .. }) => true,
            (FireAction::CloseFraction { level, .. }, TriggerCondition::PartialTakeProfit { levels }) => {
                *level < levels.len() && !trigger.is_level_fired(*level)
            }
            _ => false,
        }
    }

    /// Records an evaluation that changed nothing. Memory only.
    pub fn touch(&self, id: &TriggerId) {
        if let Some(trigger) = self.index.write().triggers.get_mut(id) {
            trigger.last_evaluated_at = Some(Utc::now());
        }
    }

    /// Ids whose latest state has not reached the store yet.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Persists then registers a new trigger.
    ///
    /// # Errors
    /// Returns `EngineError::Storage` if the record could not be written; the
    /// registry is left unchanged.
    pub async fn insert(&self, trigger: Trigger) -> Result<Trigger, EngineError> {
        let _writer = self.writer.lock().await;
        self.flush_dirty().await;

        self.store.save(&trigger).await?;
        self.index.write().put(trigger.clone());
        debug!(trigger_id = %trigger.id, position = %trigger.position_ref, "Trigger registered");
        Ok(trigger)
    }

    /// Deletes a trigger from the store and then from memory.
    ///
    /// # Errors
    /// `EngineError::NotFound` for an unknown id, `EngineError::Storage` if the
    /// record could not be deleted (the trigger then stays registered).
    pub async fn remove(&self, id: &TriggerId) -> Result<Trigger, EngineError> {
        let _writer = self.writer.lock().await;
        self.flush_dirty().await;
        self.remove_locked(id).await
    }

    /// Removes every trigger attached to `position`.
    ///
    /// # Errors
    /// Stops at the first store failure; triggers removed before it stay removed.
    pub async fn remove_for_position(&self, position: &PositionRef) -> Result<Vec<Trigger>, EngineError> {
        let _writer = self.writer.lock().await;
        self.flush_dirty().await;

        let ids: Vec<TriggerId> = self
            .index
            .read()
            .by_position
            .get(position)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            removed.push(self.remove_locked(&id).await?);
        }
        Ok(removed)
    }

    /// Deletes every trigger in a terminal state.
    ///
    /// # Errors
    /// Stops at the first store failure; triggers purged before it stay purged.
    pub async fn purge_terminal(&self) -> Result<Vec<Trigger>, EngineError> {
        let _writer = self.writer.lock().await;
        self.flush_dirty().await;

        let ids: Vec<TriggerId> = self
            .index
            .read()
            .triggers
            .values()
            .filter(|t| t.is_terminal())
            .map(|t| t.id)
            .collect();

        let mut purged = Vec::with_capacity(ids.len());
        for id in ids {
            purged.push(self.remove_locked(&id).await?);
        }
        Ok(purged)
    }

    /// Pending becomes Armed.
    ///
    /// # Errors
    /// `EngineError::NotFound` if the trigger was removed.
    pub async fn mark_armed(&self, id: &TriggerId) -> Result<Trigger, EngineError> {
        self.commit(id, |t| t.armed(Utc::now())).await
    }

    /// # Errors
    /// `EngineError::NotFound` if the trigger was removed.
    pub async fn cancel(&self, id: &TriggerId, reason: &str) -> Result<Trigger, EngineError> {
        self.commit(id, |t| t.cancelled(reason, Utc::now())).await
    }

    /// # Errors
    /// `EngineError::NotFound` if the trigger was removed.
    pub async fn fail(&self, id: &TriggerId, reason: &str) -> Result<Trigger, EngineError> {
        self.commit(id, |t| t.failed(reason, Utc::now())).await
    }

    /// Records a successful order for `action`.
    ///
    /// # Errors
    /// `EngineError::NotFound` if the trigger was removed while the order was in
    /// flight. Nothing is written in that case.
    pub async fn record_fire(&self, id: &TriggerId, action: &FireAction) -> Result<Trigger, EngineError> {
        self.commit(id, |t| {
            if t.is_terminal() {
                return t.clone();
            }
            match action {
                FireAction::SetStopLoss { .. } => t.fired(Utc::now()),
                FireAction::CloseFraction { level, .. } => t.level_fired(*level, Utc::now()),
            }
        })
        .await
    }

    /// Counts a failed order, failing the trigger once `max_attempts` is reached.
    ///
    /// # Errors
    /// `EngineError::NotFound` if the trigger was removed.
    pub async fn record_gateway_failure(
        &self,
        id: &TriggerId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Trigger, EngineError> {
        self.commit(id, |t| {
            if t.is_terminal() {
                return t.clone();
            }
            t.with_gateway_failure(error, max_attempts, Utc::now())
        })
        .await
    }

    async fn commit<F>(&self, id: &TriggerId, transition: F) -> Result<Trigger, EngineError>
    where
        F: FnOnce(&Trigger) -> Trigger + Send,
    {
        let _writer = self.writer.lock().await;
        self.flush_dirty().await;

        let next = {
            let index = self.index.read();
            let current = index.triggers.get(id).ok_or(EngineError::NotFound(*id))?;
            transition(current)
        };

        let saved = self.store.save(&next).await;
        self.index.write().put(next.clone());

        match saved {
            Ok(()) => {
                self.dirty.lock().remove(id);
            }
            Err(e) => {
                error!(
                    trigger_id = %id,
                    state = %next.state,
                    error = %e,
                    "Failed to persist trigger transition; will retry on next write"
                );
                self.dirty.lock().insert(*id);
            }
        }
        Ok(next)
    }

    async fn remove_locked(&self, id: &TriggerId) -> Result<Trigger, EngineError> {
        if !self.index.read().triggers.contains_key(id) {
            return Err(EngineError::NotFound(*id));
        }

        match self.store.delete(id).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                warn!(trigger_id = %id, "Trigger had no stored record; removing from memory only");
            }
            Err(e) => return Err(e.into()),
        }

        self.dirty.lock().remove(id);
        let removed = self.index.write().take(id).ok_or(EngineError::NotFound(*id))?;
        debug!(trigger_id = %id, position = %removed.position_ref, "Trigger unregistered");
        Ok(removed)
    }

    /// Re-saves triggers whose last write failed. Caller holds the writer lock.
    async fn flush_dirty(&self) {
        let ids: Vec<TriggerId> = self.dirty.lock().iter().copied().collect();
        for id in ids {
            let Some(trigger) = self.get(&id) else {
                self.dirty.lock().remove(&id);
                continue;
            };
            match self.store.save(&trigger).await {
                Ok(()) => {
                    self.dirty.lock().remove(&id);
                    info!(trigger_id = %id, "Recovered deferred trigger write");
                }
                Err(e) => {
                    warn!(trigger_id = %id, error = %e, "Deferred trigger write still failing");
                }
            }
        }
    }
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("triggers", &self.len())
            .field("pending_writes", &self.pending_writes())
            .finish_non_exhaustive()
    }
}

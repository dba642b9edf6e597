//! Volatile trigger store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use trade_guard_core::{StorageError, Trigger, TriggerId, TriggerStore};

/// `HashMap`-backed store. Writes can be made to fail to exercise storage-error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<TriggerId, Trigger>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `triggers`, as if left by a previous run.
    #[must_use]
    pub fn with_triggers(triggers: impl IntoIterator<Item = Trigger>) -> Self {
        let store = Self::new();
        store
            .records
            .lock()
            .extend(triggers.into_iter().map(|t| (t.id, t)));
        store
    }

    /// When set, `save` and `delete` fail with an IO error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get(&self, id: &TriggerId) -> Option<Trigger> {
        self.records.lock().get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TriggerStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Trigger>, StorageError> {
        let mut triggers: Vec<Trigger> = self.records.lock().values().cloned().collect();
        triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(triggers)
    }

    async fn save(&self, trigger: &Trigger) -> Result<(), StorageError> {
        self.check_writable()?;
        self.records.lock().insert(trigger.id, trigger.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, id: &TriggerId) -> Result<(), StorageError> {
        self.check_writable()?;
        self.records
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or(StorageError::NotFound(*id))
    }
}

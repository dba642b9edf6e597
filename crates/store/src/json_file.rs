//! Trigger persistence for surviving restarts.
//!
//! Each trigger lives in its own `<id>.json` file inside the store directory:
//!
//! - Saves write `<id>.json.tmp`, fsync it, then rename it over the live record,
//!   so a crash mid-write leaves either the old record or the new one, never half of each
//! - Loads skip corrupt or mismatched records with a warning instead of failing startup
//! - Leftover `.tmp` files from an interrupted save are discarded on load
//!
//! # Example
//!
//! ```ignore
//! use trade_guard_store::JsonFileStore;
//! use trade_guard_core::TriggerStore;
//!
//! let store = JsonFileStore::new("data/triggers");
//! let triggers = store.load_all().await?;
//! store.save(&trigger).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use trade_guard_core::{StorageError, Trigger, TriggerId, TriggerStore};

/// Current on-disk record layout.
pub const SCHEMA_VERSION: u32 = 1;

const RECORD_EXT: &str = "json";
const TMP_SUFFIX: &str = ".json.tmp";

/// Persisted trigger envelope.
///
/// This is the format saved to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub schema_version: u32,

    /// Timestamp when this was saved.
    pub saved_at: DateTime<Utc>,

    pub trigger: Trigger,
}

impl TriggerRecord {
    #[must_use]
    pub fn new(trigger: Trigger) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            trigger,
        }
    }
}

/// Directory-backed trigger store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the live record for `id`.
    #[must_use]
    pub fn record_path(&self, id: &TriggerId) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXT}"))
    }

    fn tmp_path(&self, id: &TriggerId) -> PathBuf {
        self.dir.join(format!("{id}{TMP_SUFFIX}"))
    }

    async fn read_record(path: &Path) -> Result<TriggerRecord, StorageError> {
        let bytes = tokio::fs::read(path).await?;
        let record: TriggerRecord = serde_json::from_slice(&bytes)?;
        Ok(record)
    }

    /// Makes the rename itself durable.
    #[cfg(unix)]
    async fn sync_dir(&self) {
        match tokio::fs::File::open(&self.dir).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(path = %self.dir.display(), error = %e, "Directory fsync failed");
                }
            }
            Err(e) => debug!(path = %self.dir.display(), error = %e, "Directory open for fsync failed"),
        }
    }

    #[cfg(not(unix))]
    async fn sync_dir(&self) {}
}

#[async_trait]
impl TriggerStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<Trigger>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.dir.display(), "No trigger store found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut triggers = Vec::new();
        let mut skipped = 0usize;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(TMP_SUFFIX) {
                warn!(path = %path.display(), "Discarding interrupted trigger write");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temp record");
                }
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            let record = match Self::read_record(&path).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable trigger record");
                    skipped += 1;
                    continue;
                }
            };

            if record.schema_version > SCHEMA_VERSION {
                warn!(
                    path = %path.display(),
                    version = record.schema_version,
                    supported = SCHEMA_VERSION,
                    "Skipping trigger record from a newer schema"
                );
                skipped += 1;
                continue;
            }

            let expected_stem = record.trigger.id.to_string();
            if path.file_stem().and_then(|s| s.to_str()) != Some(expected_stem.as_str()) {
                warn!(
                    path = %path.display(),
                    trigger_id = %record.trigger.id,
                    "Skipping trigger record whose file name does not match its id"
                );
                skipped += 1;
                continue;
            }

            triggers.push(record.trigger);
        }

        triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        info!(
            path = %self.dir.display(),
            loaded = triggers.len(),
            skipped,
            "Loaded trigger store"
        );

        Ok(triggers)
    }

    async fn save(&self, trigger: &Trigger) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let record = TriggerRecord::new(trigger.clone());
        let bytes = serde_json::to_vec_pretty(&record)?;

        let tmp = self.tmp_path(&trigger.id);
        let path = self.record_path(&trigger.id);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        self.sync_dir().await;

        debug!(
            trigger_id = %trigger.id,
            state = %trigger.state,
            path = %path.display(),
            "Saved trigger record"
        );

        Ok(())
    }

    async fn delete(&self, id: &TriggerId) -> Result<(), StorageError> {
        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.sync_dir().await;
                debug!(trigger_id = %id, "Deleted trigger record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

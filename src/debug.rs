//! Per-key diagnostics for the persistence layer.
//!
//! Each storage key gets a [`DebugSnapshot`] describing where its state was
//! last loaded from, how large the record looked in each tier, and the most
//! recent write failure. Snapshots are process-local and never persisted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::key::StorageKey;

/// Tier a record was last loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadSource {
    DurableKv,
    MemoryCache,
    NativeFile,
    Empty,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadSource::DurableKv => "durableKv",
            LoadSource::MemoryCache => "memoryCache",
            LoadSource::NativeFile => "nativeFile",
            LoadSource::Empty => "empty",
        })
    }
}

/// Tier named in a write error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    MemoryCache,
    DurableKv,
    NativeFile,
}

/// The most recent failed write for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteError {
    pub tier: Tier,
    pub message: String,
    pub at_ms: u64,
}

/// Diagnostic state for one storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub load_source: Option<LoadSource>,
    pub kv_bytes: Option<usize>,
    pub cache_bytes: Option<usize>,
    pub native_bytes: Option<usize>,
    pub last_write_error: Option<WriteError>,
    pub updated_at_ms: u64,
}

impl Default for DebugSnapshot {
    fn default() -> Self {
        Self {
            load_source: None,
            kv_bytes: None,
            cache_bytes: None,
            native_bytes: None,
            last_write_error: None,
            updated_at_ms: now_ms(),
        }
    }
}

/// Process-wide registry of snapshots, keyed by storage key.
///
/// Read-only to callers; the controller updates it.
#[derive(Debug, Clone, Default)]
pub struct DebugRegistry {
    snapshots: Arc<RwLock<BTreeMap<StorageKey, DebugSnapshot>>>,
}

impl DebugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StorageKey) -> Option<DebugSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Every snapshot, ordered by key.
    pub fn all(&self) -> BTreeMap<StorageKey, DebugSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_load(&self, key: &StorageKey, source: LoadSource) {
        self.update(key, |s| s.load_source = Some(source));
    }

    /// Note an empty load without creating a snapshot for an unseen key.
    pub(crate) fn record_empty_load(&self, key: &StorageKey) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = snapshots.get_mut(key) {
            snapshot.load_source = Some(LoadSource::Empty);
            snapshot.updated_at_ms = now_ms();
        }
    }

    pub(crate) fn record_sizes(
        &self,
        key: &StorageKey,
        kv: Option<usize>,
        cache: Option<usize>,
    ) {
        self.update(key, |s| {
            if kv.is_some() {
                s.kv_bytes = kv;
            }
            if cache.is_some() {
                s.cache_bytes = cache;
            }
        });
    }

    pub(crate) fn record_native_size(&self, key: &StorageKey, bytes: usize) {
        self.update(key, |s| s.native_bytes = Some(bytes));
    }

    pub(crate) fn record_write_error(&self, key: &StorageKey, tier: Tier, message: String) {
        self.update(key, |s| {
            s.last_write_error = Some(WriteError {
                tier,
                message,
                at_ms: now_ms(),
            })
        });
    }

    /// Forget a successful tier's earlier failure.
    pub(crate) fn clear_write_error(&self, key: &StorageKey, tier: Tier) {
        self.update(key, |s| {
            if s.last_write_error.as_ref().is_some_and(|e| e.tier == tier) {
                s.last_write_error = None;
            }
        });
    }

    pub(crate) fn remove(&self, key: &StorageKey) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn update(&self, key: &StorageKey, f: impl FnOnce(&mut DebugSnapshot)) {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = snapshots.entry(key.clone()).or_default();
        f(snapshot);
        snapshot.updated_at_ms = now_ms();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

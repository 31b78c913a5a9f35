//! Persistence controller: reads and writes form records across the tiers.
//!
//! Reads go KV first, then the volatile cache, then an empty record; the
//! native file tier is read separately and asynchronously (see
//! [`PersistenceController::load_native`]) because it may be slow but is the
//! most durable copy on mobile.
//!
//! Writes fan out to every tier: cache synchronously, native file in the
//! background, KV synchronously. Only the KV result is reported back; native
//! failures land in the debug snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use serde::Serialize;

use crate::cache::VolatileCache;
use crate::config::StoreConfig;
use crate::debug::{DebugRegistry, DebugSnapshot, LoadSource, Tier};
use crate::key::{
    FormKey, NATIVE_FORM_ROOT, NATIVE_PHOTO_ROOT, StorageKey, WorkLogId, extract_work_log_id,
    has_form_prefix, sanitize_path_segment,
};
use crate::logging::{debug, info, trace, warn};
use crate::photo::PhotoPreviewStore;
use crate::record::FormRecord;
use crate::tier::{FileStore, FileStoreError, KvError, KvStore};

/// A record returned by the synchronous load path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRecord {
    pub record: FormRecord,
    pub source: LoadSource,
}

/// Result of a stale-form sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Keys deleted because their work log is no longer active.
    pub removed: Vec<String>,
    /// Form keys left in place.
    pub kept: usize,
    /// Keys whose removal failed.
    pub failed: usize,
}

/// Orchestrates the volatile cache, durable KV, and native file tiers.
///
/// Cheap to clone; clones share the same tiers, cache, and debug registry.
#[derive(Clone)]
pub struct PersistenceController {
    inner: Arc<Inner>,
}

struct Inner {
    prefix: String,
    saved_flash: Duration,
    kv: Arc<dyn KvStore>,
    files: Option<Arc<dyn FileStore>>,
    photos: PhotoPreviewStore,
    cache: VolatileCache,
    debug: DebugRegistry,
    native: NativeWrites,
}

/// Keeps background native writes ordered per key.
///
/// Each write takes a sequence number from a shared counter and registers it
/// as the latest for its key. A write whose key no longer maps to its own
/// sequence is skipped, so an older payload can never land after a newer one
/// or after the key was cleared. Entries only live while a write is queued.
#[derive(Default)]
struct NativeWrites {
    latest: Mutex<HashMap<StorageKey, u64>>,
    seq: AtomicU64,
    lock: tokio::sync::Mutex<()>,
    pending: AtomicUsize,
    idle: Notify,
}

impl NativeWrites {
    fn latest(&self) -> MutexGuard<'_, HashMap<StorageKey, u64>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_seq(&self, key: &StorageKey) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest().insert(key.clone(), seq);
        seq
    }

    fn is_latest(&self, key: &StorageKey, seq: u64) -> bool {
        self.latest().get(key).is_some_and(|latest| *latest == seq)
    }

    /// Forget `key` once its latest write has landed.
    fn settle(&self, key: &StorageKey, seq: u64) {
        let mut latest = self.latest();
        if latest.get(key).is_some_and(|l| *l == seq) {
            latest.remove(key);
        }
    }

    /// Drop any queued write for `key`.
    fn invalidate(&self, key: &StorageKey) {
        self.latest().remove(key);
    }

    fn tracked(&self) -> usize {
        self.latest().len()
    }

    fn begin(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Builder for [`PersistenceController`].
pub struct ControllerBuilder {
    prefix: String,
    saved_flash: Duration,
    kv: Arc<dyn KvStore>,
    files: Option<Arc<dyn FileStore>>,
    cache: VolatileCache,
    debug: DebugRegistry,
}

impl ControllerBuilder {
    /// Attach the native file tier. Leave unset on non-native platforms.
    pub fn file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn saved_flash(mut self, flash: Duration) -> Self {
        self.saved_flash = flash;
        self
    }

    /// Share an existing cache, e.g. with another controller in-process.
    pub fn cache(mut self, cache: VolatileCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn debug_registry(mut self, debug: DebugRegistry) -> Self {
        self.debug = debug;
        self
    }

    /// Apply prefix and flash settings from configuration.
    pub fn config(self, config: &StoreConfig) -> Self {
        self.key_prefix(config.key_prefix.clone())
            .saved_flash(config.saved_flash())
    }

    pub fn build(self) -> PersistenceController {
        PersistenceController {
            inner: Arc::new(Inner {
                prefix: self.prefix,
                saved_flash: self.saved_flash,
                photos: PhotoPreviewStore::new(self.files.clone()),
                kv: self.kv,
                files: self.files,
                cache: self.cache,
                debug: self.debug,
                native: NativeWrites::default(),
            }),
        }
    }
}

impl PersistenceController {
    /// Start building a controller over `kv`.
    pub fn builder(kv: Arc<dyn KvStore>) -> ControllerBuilder {
        let defaults = StoreConfig::default();
        ControllerBuilder {
            prefix: defaults.key_prefix.clone(),
            saved_flash: defaults.saved_flash(),
            kv,
            files: None,
            cache: VolatileCache::new(),
            debug: DebugRegistry::new(),
        }
    }

    pub fn storage_key(&self, key: &FormKey) -> StorageKey {
        key.storage_key(&self.inner.prefix)
    }

    pub fn key_prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Whether the native file tier is in use.
    pub fn is_native(&self) -> bool {
        self.inner.files.is_some()
    }

    pub fn saved_flash(&self) -> Duration {
        self.inner.saved_flash
    }

    pub fn photos(&self) -> &PhotoPreviewStore {
        &self.inner.photos
    }

    pub fn cache(&self) -> &VolatileCache {
        &self.inner.cache
    }

    pub fn debug_snapshot(&self, key: &FormKey) -> Option<DebugSnapshot> {
        self.inner.debug.get(&self.storage_key(key))
    }

    pub fn debug_registry(&self) -> &DebugRegistry {
        &self.inner.debug
    }

    /// Synchronous load: KV, then cache, then empty.
    ///
    /// A KV hit refreshes the cache. KV read errors and unparseable content
    /// fall through to the cache rather than failing.
    pub fn load(&self, key: &FormKey) -> LoadedRecord {
        let skey = self.storage_key(key);

        match self.inner.kv.get(skey.as_str()) {
            Ok(Some(raw)) => match FormRecord::decode(key.variant, &raw) {
                Ok(record) if !record.is_empty() => {
                    self.inner.cache.put(skey.clone(), record.clone());
                    self.inner.debug.record_sizes(&skey, Some(raw.len()), Some(raw.len()));
                    self.inner.debug.record_load(&skey, LoadSource::DurableKv);
                    debug!(key = %skey, bytes = raw.len(), "form loaded from kv");
                    return LoadedRecord {
                        record,
                        source: LoadSource::DurableKv,
                    };
                }
                Ok(_) => trace!(key = %skey, "kv record empty"),
                Err(e) => warn!(key = %skey, error = %e, "kv record unparseable, falling back"),
            },
            Ok(None) => trace!(key = %skey, "kv miss"),
            Err(e) => warn!(key = %skey, error = %e, "kv read failed, falling back"),
        }

        if let Some(record) = self.inner.cache.get_non_empty(&skey) {
            let size = record.encode().map(|s| s.len()).ok();
            self.inner.debug.record_sizes(&skey, None, size);
            self.inner.debug.record_load(&skey, LoadSource::MemoryCache);
            debug!(key = %skey, "form loaded from memory cache");
            return LoadedRecord {
                record,
                source: LoadSource::MemoryCache,
            };
        }

        self.inner.debug.record_empty_load(&skey);
        LoadedRecord {
            record: FormRecord::empty(key.variant),
            source: LoadSource::Empty,
        }
    }

    /// Read the native JSON copy of a record.
    ///
    /// `Ok(None)` when native storage is unavailable, the file is absent, or
    /// its content is empty or unparseable.
    pub async fn load_native(&self, key: &FormKey) -> Result<Option<FormRecord>, FileStoreError> {
        let Some(files) = &self.inner.files else {
            return Ok(None);
        };
        let skey = self.storage_key(key);

        let raw = match files.read_file(&skey.native_form_path()).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        self.inner.debug.record_native_size(&skey, raw.len());

        match FormRecord::decode(key.variant, &raw) {
            Ok(record) if !record.is_empty() => Ok(Some(record)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(key = %skey, error = %e, "native record unparseable, ignoring");
                Ok(None)
            }
        }
    }

    /// Make a record read from the native tier the cached state.
    pub fn adopt_native(&self, key: &FormKey, record: FormRecord) {
        let skey = self.storage_key(key);
        self.inner.cache.put(skey.clone(), record);
        self.inner.debug.record_load(&skey, LoadSource::NativeFile);
        debug!(key = %skey, "native record adopted");
    }

    /// Cached record for `key`, if any.
    pub fn cached(&self, key: &FormKey) -> Option<FormRecord> {
        self.inner.cache.get(&self.storage_key(key))
    }

    /// Write `record` through every tier.
    ///
    /// The cache is updated first, the native write is queued in the
    /// background, and the KV write happens inline. A KV failure is recorded
    /// in the debug snapshot and returned; the cached state stays updated.
    pub fn persist(&self, key: &FormKey, record: &FormRecord) -> Result<(), KvError> {
        let skey = self.storage_key(key);
        self.inner.cache.put(skey.clone(), record.clone());

        let encoded = match record.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                let err = KvError::Unavailable(format!("record could not be encoded: {}", e));
                self.inner.debug.record_write_error(&skey, Tier::DurableKv, err.to_string());
                return Err(err);
            }
        };
        self.inner.debug.record_sizes(&skey, None, Some(encoded.len()));

        self.spawn_native_write(&skey, encoded.clone());

        match self.inner.kv.set(skey.as_str(), &encoded) {
            Ok(()) => {
                self.inner.debug.record_sizes(&skey, Some(encoded.len()), None);
                self.inner.debug.clear_write_error(&skey, Tier::DurableKv);
                trace!(key = %skey, bytes = encoded.len(), "form persisted");
                Ok(())
            }
            Err(e) => {
                warn!(key = %skey, tier = "kv", error = %e, "durable write failed");
                self.inner
                    .debug
                    .record_write_error(&skey, Tier::DurableKv, e.to_string());
                Err(e)
            }
        }
    }

    fn spawn_native_write(&self, skey: &StorageKey, encoded: String) {
        if self.inner.files.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %skey, "no async runtime, native write skipped");
            self.inner.debug.record_write_error(
                skey,
                Tier::NativeFile,
                FileStoreError::NoRuntime.to_string(),
            );
            return;
        };

        let seq = self.inner.native.next_seq(skey);
        let inner = Arc::clone(&self.inner);
        let skey = skey.clone();
        inner.native.begin();
        handle.spawn(async move {
            inner.write_native(&skey, seq, &encoded).await;
            inner.native.finish();
        });
    }

    /// Wait until every queued native write has landed or been skipped.
    pub async fn flush_native(&self) {
        loop {
            let idle = self.inner.native.idle.notified();
            if self.inner.native.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Remove every trace of `key` from all tiers.
    ///
    /// KV and cache removal happen first; native deletions are best-effort and
    /// their failures are only logged.
    pub async fn clear_persisted_data(&self, key: &FormKey) {
        let skey = self.storage_key(key);

        if let Err(e) = self.inner.kv.remove(skey.as_str()) {
            warn!(key = %skey, error = %e, "kv removal failed during clear");
        }
        self.inner.cache.remove(&skey);
        self.inner.debug.remove(&skey);

        let Some(files) = &self.inner.files else {
            info!(key = %skey, "persisted form cleared");
            return;
        };

        // Invalidate queued writes before deleting so none can land afterwards.
        self.inner.native.invalidate(&skey);
        let _guard = self.inner.native.lock.lock().await;

        if let Err(e) = self.inner.photos.clear_previews(&skey).await {
            warn!(key = %skey, error = %e, "native preview cleanup failed");
        }
        if let Err(e) = files.delete_file(&skey.native_form_path()).await {
            warn!(key = %skey, error = %e, "native record cleanup failed");
        }
        info!(key = %skey, "persisted form cleared");
    }

    /// Delete KV form records whose work log is not in `active`.
    ///
    /// Swept keys are also evicted from the cache. Failures are counted, never
    /// raised.
    pub fn cleanup_stale_forms(&self, active: &[WorkLogId]) -> SweepReport {
        let active: HashSet<&str> = active.iter().map(WorkLogId::as_str).collect();
        let mut report = SweepReport::default();

        let keys = match self.inner.kv.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "stale form sweep could not list keys");
                return report;
            }
        };

        for key in keys {
            if !has_form_prefix(&self.inner.prefix, &key) {
                continue;
            }
            let Some(id) = extract_work_log_id(&self.inner.prefix, &key) else {
                continue;
            };
            if active.contains(id) {
                report.kept += 1;
                continue;
            }
            match self.inner.kv.remove(&key) {
                Ok(()) => {
                    let skey = StorageKey::from_raw(key.clone());
                    self.inner.cache.remove(&skey);
                    self.inner.debug.remove(&skey);
                    report.removed.push(key);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "stale form removal failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            removed = report.removed.len(),
            kept = report.kept,
            failed = report.failed,
            "stale form sweep finished"
        );
        report
    }

    /// Delete native form files and preview directories whose work log is
    /// not in `active`.
    ///
    /// Companion to [`cleanup_stale_forms`](Self::cleanup_stale_forms), which
    /// only touches KV and the cache. `removed` lists the native paths deleted.
    /// A no-op without a native tier.
    pub async fn cleanup_stale_native(&self, active: &[WorkLogId]) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(files) = &self.inner.files else {
            return report;
        };
        // Native names are sanitized, so compare against sanitized ids.
        let prefix = sanitize_path_segment(&self.inner.prefix);
        let active: HashSet<String> = active
            .iter()
            .map(|id| sanitize_path_segment(id.as_str()))
            .collect();

        let _guard = self.inner.native.lock.lock().await;

        for root in [NATIVE_FORM_ROOT, NATIVE_PHOTO_ROOT] {
            let names = match files.list_dir(root).await {
                Ok(names) => names,
                Err(e) => {
                    warn!(root = root, error = %e, "stale native sweep could not list files");
                    continue;
                }
            };

            for name in names {
                let stem = if root == NATIVE_FORM_ROOT {
                    match name.strip_suffix(".json") {
                        Some(stem) => stem,
                        None => continue,
                    }
                } else {
                    name.as_str()
                };
                let Some(id) = extract_work_log_id(&prefix, stem) else {
                    continue;
                };
                if active.contains(id) {
                    report.kept += 1;
                    continue;
                }

                let path = format!("{}/{}", root, name);
                let result = if root == NATIVE_FORM_ROOT {
                    files.delete_file(&path).await
                } else {
                    files.remove_dir(&path).await
                };
                match result {
                    Ok(()) => {
                        let skey = StorageKey::from_raw(stem.to_string());
                        self.inner.native.invalidate(&skey);
                        self.inner.cache.remove(&skey);
                        self.inner.debug.remove(&skey);
                        report.removed.push(path);
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "stale native removal failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            removed = report.removed.len(),
            kept = report.kept,
            failed = report.failed,
            "stale native sweep finished"
        );
        report
    }
}

impl Inner {
    async fn write_native(&self, skey: &StorageKey, seq: u64, encoded: &str) {
        let Some(files) = &self.files else {
            return;
        };
        let _guard = self.native.lock.lock().await;
        if !self.native.is_latest(skey, seq) {
            trace!(key = %skey, seq = seq, "superseded native write skipped");
            return;
        }

        match files.write_file(&skey.native_form_path(), encoded).await {
            Ok(()) => {
                self.debug.record_native_size(skey, encoded.len());
                self.debug.clear_write_error(skey, Tier::NativeFile);
            }
            Err(e) => {
                warn!(key = %skey, tier = "native", error = %e, "native write failed");
                self.debug
                    .record_write_error(skey, Tier::NativeFile, e.to_string());
            }
        }
        self.native.settle(skey, seq);
    }
}

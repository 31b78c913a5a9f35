//! Common test utilities and fixtures.
//!
//! Tiers that can be made to fail or stall on demand, plus a small harness
//! wiring them into a controller.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use checkout_store::{
    FileStore, FileStoreError, FormKey, FormRecord, KvError, KvStore, MemoryFileStore, MemoryKv,
    PersistenceController,
};
use tokio::sync::{Semaphore, watch};

// =============================================================================
// Fixtures
// =============================================================================

/// Sample plow record stored directly under its encoded form.
pub const PLOW_NOTES_JSON: &str = r#"{"notes":"y","snowDepth":"4"}"#;

/// Build a record from `(field, value)` pairs.
pub fn record(key: &FormKey, fields: &[(&str, &str)]) -> FormRecord {
    let mut record = FormRecord::empty(key.variant);
    for (name, value) in fields {
        record
            .set_field(name, (*value).into())
            .unwrap_or_else(|e| panic!("fixture field {name}: {e}"));
    }
    record
}

// =============================================================================
// Faulty tiers
// =============================================================================

/// KV tier whose reads and writes can be switched to fail.
#[derive(Default)]
pub struct FlakyKv {
    pub inner: MemoryKv,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KvStore for FlakyKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("storage disabled".to_string()));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("storage disabled".to_string()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        self.inner.keys()
    }
}

/// File tier whose reads block until released.
///
/// Lets tests hold a native reconciliation in flight while they edit,
/// rebind, or detach the form.
pub struct GatedFileStore {
    pub inner: MemoryFileStore,
    gate: Semaphore,
    reads_started: AtomicUsize,
    fail_writes: AtomicBool,
}

impl GatedFileStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryFileStore::new(),
            gate: Semaphore::new(0),
            reads_started: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// A store that never blocks reads.
    pub fn open() -> Self {
        let store = Self::new();
        store.release(Semaphore::MAX_PERMITS / 2);
        store
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let `n` pending or future reads through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn reads_started(&self) -> usize {
        self.reads_started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` reads are blocked at the gate or past it.
    pub async fn wait_for_reads(&self, n: usize) {
        for _ in 0..1000 {
            if self.reads_started() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} native reads, saw {}", self.reads_started());
    }
}

#[async_trait]
impl FileStore for GatedFileStore {
    async fn read_file(&self, path: &str) -> Result<String, FileStoreError> {
        self.reads_started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FileStoreError::Unavailable)?;
        permit.forget();
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), FileStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FileStoreError::Io {
                path: path.to_string(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.write_file(path, contents).await
    }

    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError> {
        self.inner.delete_file(path).await
    }

    async fn remove_dir(&self, path: &str) -> Result<(), FileStoreError> {
        self.inner.remove_dir(path).await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, FileStoreError> {
        self.inner.list_dir(path).await
    }
}

/// Controller over a fresh KV and the given file tier.
pub fn controller_with_files(files: Arc<GatedFileStore>) -> (Arc<MemoryKv>, PersistenceController) {
    let kv = Arc::new(MemoryKv::new());
    let controller = PersistenceController::builder(kv.clone())
        .file_store(files)
        .build();
    (kv, controller)
}

// =============================================================================
// Harness
// =============================================================================

/// Controller over in-memory tiers.
pub struct TestApp {
    pub kv: Arc<MemoryKv>,
    pub files: Option<Arc<MemoryFileStore>>,
    pub controller: PersistenceController,
}

impl TestApp {
    /// No native file tier, as in a browser.
    pub fn web() -> Self {
        let kv = Arc::new(MemoryKv::new());
        let controller = PersistenceController::builder(kv.clone())
            .saved_flash(Duration::from_millis(1500))
            .build();
        Self {
            kv,
            files: None,
            controller,
        }
    }

    /// With a native file tier.
    pub fn native() -> Self {
        let kv = Arc::new(MemoryKv::new());
        let files = Arc::new(MemoryFileStore::new());
        let controller = PersistenceController::builder(kv.clone())
            .file_store(files.clone())
            .build();
        Self {
            kv,
            files: Some(files),
            controller,
        }
    }

    pub fn files(&self) -> &MemoryFileStore {
        self.files.as_deref().unwrap_or_else(|| panic!("web app has no file tier"))
    }

    /// Raw KV value for `key`.
    pub fn kv_raw(&self, key: &FormKey) -> Option<String> {
        self.kv
            .get(self.controller.storage_key(key).as_str())
            .unwrap_or_else(|e| panic!("kv read: {e}"))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Let spawned tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Wait until the watched value satisfies `pred`, failing after a bound.
pub async fn wait_until<T>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) -> T
where
    T: Clone,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state"))
        .unwrap_or_else(|_| panic!("sender dropped"))
        .clone()
}

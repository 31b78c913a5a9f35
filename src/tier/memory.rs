//! In-process tier implementations.
//!
//! `MemoryKv` stands in for browser local storage: it can enforce a
//! per-value quota the way the real thing throws on large writes, and counts
//! writes so callers can observe storage churn.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{FileStore, FileStoreError, KvError, KvStore, check_relative_path};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key-value tier held in memory.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
    max_value_bytes: Option<usize>,
    writes: AtomicUsize,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values larger than `limit` bytes with [`KvError::QuotaExceeded`].
    pub fn with_quota(limit: usize) -> Self {
        Self {
            max_value_bytes: Some(limit),
            ..Self::default()
        }
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Drop every entry, as the OS does when it reclaims a killed WebView.
    pub fn wipe(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        if let Some(limit) = self.max_value_bytes
            && value.len() > limit
        {
            return Err(KvError::QuotaExceeded {
                key: key.to_string(),
                size: value.len(),
                limit,
            });
        }
        lock(&self.entries).insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

/// Native file tier held in memory, keyed by relative path.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: Mutex<BTreeMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Paths currently stored, sorted.
    pub fn paths(&self) -> Vec<String> {
        lock(&self.files).keys().cloned().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        lock(&self.files).contains_key(path)
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read_file(&self, path: &str) -> Result<String, FileStoreError> {
        check_relative_path(path)?;
        lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), FileStoreError> {
        check_relative_path(path)?;
        lock(&self.files).insert(path.to_string(), contents.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError> {
        check_relative_path(path)?;
        lock(&self.files).remove(path);
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> Result<(), FileStoreError> {
        check_relative_path(path)?;
        let dir = format!("{}/", path.trim_end_matches('/'));
        lock(&self.files).retain(|p, _| !p.starts_with(&dir));
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, FileStoreError> {
        check_relative_path(path)?;
        let dir = format!("{}/", path.trim_end_matches('/'));
        let names: BTreeSet<String> = lock(&self.files)
            .keys()
            .filter_map(|p| p.strip_prefix(&dir))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }
}

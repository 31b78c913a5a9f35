//! Storage tier contracts and their implementations.
//!
//! Two durable tiers sit behind traits so hosts can plug in the platform's
//! real storage:
//!
//! - [`KvStore`]: origin-scoped key-value storage. Synchronous; may fail on
//!   write (quota) or come back empty after the host process was killed.
//! - [`FileStore`]: native file storage, present only on native runtimes.
//!   Asynchronous; survives WebView process termination.
//!
//! The volatile tier lives in [`crate::cache`].

mod dir;
mod error;
#[cfg(feature = "kv")]
mod fjall_kv;
mod memory;

use async_trait::async_trait;

pub use dir::DirFileStore;
pub use error::{FileStoreError, KvError};
#[cfg(feature = "kv")]
pub use fjall_kv::FjallKv;
pub use memory::{MemoryFileStore, MemoryKv};

/// Durable key-value tier.
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Remove a key. Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), KvError>;

    /// All keys currently stored.
    fn keys(&self) -> Result<Vec<String>, KvError>;
}

/// Durable native file tier.
///
/// Paths are relative and `/`-separated, e.g.
/// `checkout-form/checkout_form_plow_42.json`.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file. Fails with [`FileStoreError::NotFound`] if absent.
    async fn read_file(&self, path: &str) -> Result<String, FileStoreError>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), FileStoreError>;

    /// Delete a file. Deleting an absent file succeeds.
    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError>;

    /// Delete a directory and everything under it. Absent directories succeed.
    async fn remove_dir(&self, path: &str) -> Result<(), FileStoreError>;

    /// Names of the direct entries of a directory, sorted. Absent directories
    /// list as empty.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, FileStoreError>;
}

/// Reject paths that could escape the store root.
pub(crate) fn check_relative_path(path: &str) -> Result<(), FileStoreError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(FileStoreError::InvalidPath(path.to_string()))
    } else {
        Ok(())
    }
}

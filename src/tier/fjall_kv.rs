//! Durable key-value tier backed by fjall.

use std::path::Path;

use fjall::{Keyspace, KeyspaceCreateOptions, PersistMode};

use super::{KvError, KvStore};
use crate::logging::{debug, error, info, trace};

const META_KEYSPACE: &str = "_meta";
const META_CONFIG_KEY: &str = "config";
const DATA_KEYSPACE: &str = "forms";

/// On-disk layout version.
/// The store refuses to open a database written with a different version.
const STORE_VERSION: u32 = 1;

/// Key-value tier persisted with fjall.
///
/// Every write is synced before returning, since this tier has to survive the
/// host process being killed right after a keystroke.
pub struct FjallKv {
    db: fjall::Database,
    data: Keyspace,
    max_value_bytes: Option<usize>,
}

impl FjallKv {
    /// Open the store at `path`, initializing it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening form KV store");

        let db = fjall::Database::builder(path).open()?;
        let meta = db.keyspace(META_KEYSPACE, KeyspaceCreateOptions::default)?;

        match meta.get(META_CONFIG_KEY)? {
            Some(config) => {
                let version = u32::from_le_bytes(config.as_ref().try_into().map_err(|_| {
                    KvError::Unavailable("invalid store config record".to_string())
                })?);
                if version != STORE_VERSION {
                    error!(
                        stored_version = version,
                        expected_version = STORE_VERSION,
                        "form store version mismatch"
                    );
                    return Err(KvError::Unavailable(format!(
                        "store version mismatch: expected {}, got {}",
                        STORE_VERSION, version
                    )));
                }
                trace!(version = version, "store version verified");
            }
            None => {
                meta.insert(META_CONFIG_KEY, STORE_VERSION.to_le_bytes())?;
                db.persist(PersistMode::SyncAll)?;
                info!(path = %path.display(), version = STORE_VERSION, "form KV store initialized");
            }
        }

        let data = db.keyspace(DATA_KEYSPACE, KeyspaceCreateOptions::default)?;
        info!(path = %path.display(), "form KV store opened");
        Ok(Self {
            db,
            data,
            max_value_bytes: None,
        })
    }

    /// Reject values larger than `limit` bytes, mirroring browser storage quotas.
    pub fn with_quota(mut self, limit: Option<usize>) -> Self {
        self.max_value_bytes = limit;
        self
    }
}

impl KvStore for FjallKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let Some(bytes) = self.data.get(key)? else {
            return Ok(None);
        };
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| KvError::InvalidUtf8(key.to_string()))
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
        self.data.insert(key, value.as_bytes())?;
        self.db.persist(PersistMode::SyncAll)?;
        trace!(key = key, bytes = value.len(), "kv value written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.data.remove(key)?;
        self.db.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, KvError> {
        let mut keys = Vec::new();
        for kv in self.data.prefix("") {
            let Ok(key_bytes) = kv.key() else {
                continue;
            };
            keys.push(String::from_utf8_lossy(&key_bytes).into_owned());
        }
        Ok(keys)
    }
}

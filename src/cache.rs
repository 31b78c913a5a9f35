//! Process-lifetime record cache.
//!
//! The cache is the volatile tier: written first on every update, read only
//! as a fallback when the durable KV tier is unreadable or has been wiped. It
//! is shared by every form session created from the same controller, so two
//! sessions bound to the same key observe the same in-memory state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::key::StorageKey;
use crate::record::FormRecord;

/// Shared map from storage key to the latest known record.
#[derive(Debug, Clone, Default)]
pub struct VolatileCache {
    entries: Arc<RwLock<HashMap<StorageKey, FormRecord>>>,
}

impl VolatileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StorageKey) -> Option<FormRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// The cached record, if present and not empty.
    pub fn get_non_empty(&self, key: &StorageKey) -> Option<FormRecord> {
        self.get(key).filter(|record| !record.is_empty())
    }

    pub fn put(&self, key: StorageKey, record: FormRecord) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record);
    }

    pub fn remove(&self, key: &StorageKey) -> Option<FormRecord> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn keys(&self) -> Vec<StorageKey> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DEFAULT_KEY_PREFIX, FormKey, Variant};

    #[test]
    fn test_clones_share_entries() {
        let cache = VolatileCache::new();
        let other = cache.clone();
        let key = FormKey::plow("1").storage_key(DEFAULT_KEY_PREFIX);

        let mut record = FormRecord::empty(Variant::Plow);
        record.set_field("notes", "x".into()).unwrap();
        cache.put(key.clone(), record.clone());

        assert_eq!(other.get(&key), Some(record));
        other.remove(&key);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_non_empty_skips_blank_records() {
        let cache = VolatileCache::new();
        let key = FormKey::shovel("1").storage_key(DEFAULT_KEY_PREFIX);
        cache.put(key.clone(), FormRecord::empty(Variant::Shovel));
        assert!(cache.get(&key).is_some());
        assert!(cache.get_non_empty(&key).is_none());
    }
}

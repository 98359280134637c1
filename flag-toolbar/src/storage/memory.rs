use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::StorageError;
use crate::storage::StorageBackend;

/// Process-lifetime key/value store. Clones share the same entries, so a
/// clone handed to the adapter can still be inspected by its creator.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock_entries().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock_entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock_entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();

        storage.set_item("key", "value").unwrap();
        assert_eq!(handle.get_item("key").unwrap().as_deref(), Some("value"));

        handle.remove_item("key").unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.get_item("key").unwrap(), None);
    }
}

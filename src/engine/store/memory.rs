//! In-memory state store, used by tests and embedders with their own
//! persistence.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{StateKey, StateStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<StateKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given entries
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (StateKey, String)>,
    {
        Self {
            values: Mutex::new(entries.into_iter().collect()),
        }
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: StateKey) -> Result<String, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(&key).cloned().unwrap_or_default())
    }

    fn put(&self, key: StateKey, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key, value.to_string());
        Ok(())
    }
}

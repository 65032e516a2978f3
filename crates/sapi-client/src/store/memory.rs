//! In-process key-value store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::KeyValueStore;
use crate::error::{Result, SapiError};

/// A [`KeyValueStore`] kept in memory for the life of the process.
///
/// Useful in tests and on hosts without a writable data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| SapiError::Storage("memory store lock poisoned".to_string()))?;
        Ok(items.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.items
            .lock()
            .map_err(|_| SapiError::Storage("memory store lock poisoned".to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }
}

//! Local persistence for the current token.
//!
//! Storage is split in two layers. A [`KeyValueStore`] moves opaque strings in
//! and out of some durable place, much like a device key-value store.
//! [`TokenStore`] sits on top and handles the JSON record format:
//!
//! ```text
//! token:api-replicate-com-i24sjl.proxy.usesapi.com
//!     -> {"token":"...","expiresAt":"2030-01-02T03:04:05Z"}
//! ```
//!
//! The store is a write-through cache. The token manager keeps the
//! authoritative copy in memory and only reads the store at startup.

mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use sapi_common::{Token, TokenRecord};

use crate::error::{Result, SapiError};

pub use file::FileStore;
pub use memory::MemoryStore;

/// A durable string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`SapiError::Storage`] if the backend cannot be read.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`SapiError::Storage`] if the backend cannot be written.
    async fn set_item(&self, key: &str, value: String) -> Result<()>;
}

/// Reads and writes token records on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Wraps a key-value backend.
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Storage key for the token of the tenant served by `proxy_host`.
    #[must_use]
    pub fn storage_key(proxy_host: &str) -> String {
        format!("token:{proxy_host}")
    }

    /// Loads the token stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`SapiError::CorruptRecord`] when a record exists but does not
    /// decode, and [`SapiError::Storage`] when the backend fails.
    pub async fn get(&self, key: &str) -> Result<Option<Token>> {
        let Some(raw) = self.backend.get_item(key).await? else {
            debug!("No token record under {key}");
            return Ok(None);
        };

        let record: TokenRecord =
            serde_json::from_str(&raw).map_err(|source| SapiError::CorruptRecord {
                key: key.to_string(),
                source,
            })?;

        Ok(Some(record.into()))
    }

    /// Stores `token` under `key`, overwriting any previous record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or the backend write fails.
    pub async fn set(&self, key: &str, token: &Token) -> Result<()> {
        let raw = serde_json::to_string(&token.to_record())?;
        self.backend.set_item(key, raw).await?;
        debug!("Stored token record under {key}");
        Ok(())
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

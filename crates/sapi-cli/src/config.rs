//! CLI configuration.
//!
//! Configuration is loaded from `~/.config/sapi/config.toml` unless a path is
//! given with `--config`. A missing file is fine as long as `--tenant-id` is
//! passed.
//!
//! ## Example Configuration
//!
//! ```toml
//! [sdk]
//! tenant_id = "api-replicate-com-i24sjl"
//! token_owner = "user-42"
//! require_auth = false
//! expiration_threshold_ms = 60000
//!
//! [store]
//! path = "/var/lib/myapp/sapi"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use sapi_client::{FileStore, KeyValueStore, MemoryStore};
use sapi_common::Config;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// SDK settings passed to `Sapi::init`
    pub sdk: Config,

    /// Where tokens are persisted
    #[serde(default)]
    pub store: StoreSettings,
}

/// Token persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory of the file store (default: `<data dir>/sapi`)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Keep tokens in memory only (default: false)
    #[serde(default)]
    pub memory: bool,
}

impl StoreSettings {
    /// Opens the configured store backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings conflict or the file store cannot be
    /// opened.
    pub fn open(&self) -> Result<Arc<dyn KeyValueStore>> {
        match (&self.path, self.memory) {
            (Some(_), true) => bail!("store.path and store.memory cannot both be set"),
            (None, true) => Ok(Arc::new(MemoryStore::new())),
            (Some(path), false) => Ok(Arc::new(
                FileStore::new(path)
                    .with_context(|| format!("Failed to open store at {}", path.display()))?,
            )),
            (None, false) => Ok(Arc::new(
                FileStore::open_default().context("Failed to open default store")?,
            )),
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or the default location.
    ///
    /// `tenant_id` overrides `sdk.tenant_id` and makes the file optional.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or parsed
    /// - No tenant identifier is available from either source
    pub fn load(path: Option<&Path>, tenant_id: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = if path.exists() {
            fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?
        } else if tenant_id.is_some() {
            String::new()
        } else {
            bail!(
                "Configuration file not found: {} (or pass --tenant-id)",
                path.display()
            );
        };

        Self::parse(&contents, tenant_id)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parses a configuration document, applying the tenant override.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or does not
    /// describe a configuration.
    pub fn parse(contents: &str, tenant_id: Option<&str>) -> Result<Self> {
        let mut document: toml::Table = toml::from_str(contents)?;

        if let Some(tenant_id) = tenant_id {
            let sdk = document
                .entry("sdk")
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            let Some(sdk) = sdk.as_table_mut() else {
                bail!("[sdk] must be a table");
            };
            sdk.insert(
                "tenant_id".to_string(),
                toml::Value::String(tenant_id.to_string()),
            );
        }

        Ok(toml::Value::Table(document).try_into()?)
    }

    /// Returns the default configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("sapi");

        Ok(config_dir.join("config.toml"))
    }
}

//! File-backed key-value store.
//!
//! All items live in a single JSON object file:
//!
//! ```text
//! ~/.local/share/sapi/
//! └── store.json    {"token:<proxy host>": "<record json>", ...}
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};

use super::KeyValueStore;
use crate::error::{Result, SapiError};

const STORE_FILE: &str = "store.json";

/// A [`KeyValueStore`] persisted to a JSON file.
///
/// File I/O runs on the blocking thread pool. Writes go to a temporary file
/// that is renamed over the store, so a crash never leaves a half-written
/// file behind.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    /// Serializes read-modify-write cycles. Only held inside `spawn_blocking`.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens (or prepares) a store inside `dir`.
    ///
    /// The directory is created if needed and restricted to the owner on unix.
    ///
    /// # Errors
    ///
    /// Returns [`SapiError::Storage`] if the directory cannot be created.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        create_private_dir(dir)?;

        Ok(Self {
            inner: Arc::new(Inner {
                path: dir.join(STORE_FILE),
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Opens the store in the platform data directory (`<data>/sapi`).
    ///
    /// # Errors
    ///
    /// Returns [`SapiError::Storage`] if the data directory cannot be
    /// determined or created.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_local_dir()
            .ok_or_else(|| SapiError::Storage("Failed to determine data directory".to_string()))?
            .join("sapi");
        Self::new(dir)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| SapiError::Storage(format!("Task join error: {e}")))?
    }
}

impl Inner {
    fn read_items(&self) -> Result<HashMap<String, String>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(SapiError::Storage(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&contents).map_err(|e| {
            SapiError::Storage(format!("Unreadable store file {}: {e}", self.path.display()))
        })
    }

    fn write_items(&self, items: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(items)?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)
            .map_err(|e| SapiError::Storage(format!("Failed to write store: {e}")))?;
        restrict_file(&temp_path)?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| SapiError::Storage(format!("Failed to replace store: {e}")))?;

        debug!(
            "Saved store file {} ({} bytes)",
            self.path.display(),
            json.len()
        );
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |inner| Ok(inner.read_items()?.remove(&key)))
            .await
    }

    async fn set_item(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.run(move |inner| {
            let _guard = inner
                .write_lock
                .lock()
                .map_err(|_| SapiError::Storage("store lock poisoned".to_string()))?;

            let mut items = inner.read_items().unwrap_or_else(|e| {
                warn!("Discarding unreadable store contents: {e}");
                HashMap::new()
            });
            items.insert(key, value);
            inner.write_items(&items)
        })
        .await
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.inner.path)
            .finish()
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| SapiError::Storage(format!("Failed to create store directory: {e}")))?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| SapiError::Storage(format!("Failed to set store permissions: {e}")))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| SapiError::Storage(format!("Failed to create store directory: {e}")))
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| SapiError::Storage(format!("Failed to set store permissions: {e}")))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}

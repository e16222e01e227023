//! Key-value storage surfaces
//!
//! The connection flow hands state across the OAuth redirect through two
//! surfaces: a long-lived `local` store and a per-session `session` store.
//! Values are JSON wrapped in a [`Versioned`] envelope so a stale or foreign
//! value is reported instead of silently decoding to nothing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::{Result, StrandError};

/// Well-known storage keys
pub mod keys {
    /// local: where to send the user after the OAuth round trip
    pub const OAUTH_RETURN_URL: &str = "oauth_return_url";
    /// local: readable id of the target collection
    pub const OAUTH_COLLECTION_ID: &str = "oauth_collection_id";
    /// local: name/readable id of the target collection
    pub const OAUTH_COLLECTION_DETAILS: &str = "oauth_collection_details";
    /// session: whether the target collection is to be created
    pub const OAUTH_IS_NEW_COLLECTION: &str = "oauth2_is_new_collection";
    /// session: the most recently created source connection
    pub const LAST_CREATED_SOURCE_CONNECTION: &str = "last_created_source_connection";
    /// local: details of the last connection failure
    pub const CONNECTION_ERROR: &str = "connection_error";
    /// local: organization selected by the user
    pub const CURRENT_ORGANIZATION_ID: &str = "current_organization_id";

    /// session: auth fields collected before an OAuth redirect
    pub fn oauth_config(short_name: &str) -> String {
        format!("oauth2_config_{}", short_name)
    }
}

/// Current envelope schema
pub const SCHEMA_VERSION: u32 = 1;

/// Versioned wrapper for every stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub schema_version: u32,
    pub data: T,
}

impl<T> Versioned<T> {
    pub fn new(data: T) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            data,
        }
    }
}

/// String key-value store (allows in-memory and file-backed variants)
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk
///
/// Lets the CLI keep flow state between the process that starts an OAuth
/// redirect and the one that completes it.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            StrandError::Storage(format!("Corrupt store {}: {}", self.path.display(), e))
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// The pair of storage surfaces the connection flow writes to
#[derive(Clone)]
pub struct BrowserStorage {
    pub local: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
}

impl BrowserStorage {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    /// Both surfaces in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Both surfaces as JSON files under `dir`
    pub fn on_disk(dir: &Path) -> Self {
        Self::new(
            Arc::new(FileStore::new(dir.join("local.json"))),
            Arc::new(FileStore::new(dir.join("session.json"))),
        )
    }

    pub fn put_local<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        put_versioned(self.local.as_ref(), key, value)
    }

    pub fn put_session<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        put_versioned(self.session.as_ref(), key, value)
    }

    pub fn get_local<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        get_versioned(self.local.as_ref(), key)
    }

    pub fn get_session<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        get_versioned(self.session.as_ref(), key)
    }

    /// Read and remove a local value
    pub fn take_local<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = get_versioned(self.local.as_ref(), key);
        self.local.remove(key)?;
        value
    }

    /// Read and remove a session value
    pub fn take_session<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = get_versioned(self.session.as_ref(), key);
        self.session.remove(key)?;
        value
    }
}

fn put_versioned<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let encoded = serde_json::to_string(&Versioned::new(value))?;
    debug!("Storing {} ({} bytes)", key, encoded.len());
    store.set(key, &encoded)
}

fn get_versioned<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    let envelope: Versioned<serde_json::Value> = serde_json::from_str(&raw)
        .map_err(|e| StrandError::Storage(format!("Malformed value for '{}': {}", key, e)))?;

    if envelope.schema_version != SCHEMA_VERSION {
        return Err(StrandError::Storage(format!(
            "Unsupported schema version {} for '{}' (expected {})",
            envelope.schema_version, key, SCHEMA_VERSION
        )));
    }

    serde_json::from_value(envelope.data)
        .map(Some)
        .map_err(|e| StrandError::Storage(format!("Unexpected shape for '{}': {}", key, e)))
}

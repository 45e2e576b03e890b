//! JSON-file backed key-value store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::kv::{KvStore, validate_key, validate_namespace};

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// A persistent store kept in one JSON file.
///
/// Like browser `localStorage`, values are strings: non-UTF-8 values are
/// rejected. The whole file is rewritten on each mutation through a
/// temporary file and a rename, so a crash never leaves a half-written file.
#[derive(Debug)]
pub struct JsonFileKvStore {
    path: PathBuf,
    data: Mutex<Namespaces>,
}

impl JsonFileKvStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. A corrupt file is logged and treated as
    /// empty; it is overwritten by the next successful write.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file exists but cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Namespaces>(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt store file, starting empty");
                Namespaces::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Namespaces::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), namespaces = data.len(), "Opened JSON file store");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &Namespaces) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self.data.lock().await;
        Ok(data
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|v| v.as_bytes().to_vec()))
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let value = String::from_utf8(value)
            .map_err(|_| StorageError::Serialization("values must be valid UTF-8".into()))?;

        let mut data = self.data.lock().await;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&data).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let mut data = self.data.lock().await;
        let removed = data
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some());
        if removed {
            if data.get(namespace).is_some_and(BTreeMap::is_empty) {
                data.remove(namespace);
            }
            self.persist(&data).await?;
        }
        Ok(removed)
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let data = self.data.lock().await;
        Ok(data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64> {
        let mut data = self.data.lock().await;
        let Some(ns) = data.remove(namespace) else {
            return Ok(0);
        };
        self.persist(&data).await?;
        Ok(u64::try_from(ns.len()).unwrap_or(u64::MAX))
    }
}

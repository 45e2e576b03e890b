//! Key-value store trait and the in-memory implementation.
//!
//! All operations are scoped to a namespace. The runtime uses the `mfe`
//! namespace for its own entries; hosts embedding the runtime are free to
//! share the same store under other namespaces.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Validate that a namespace is safe for use as a key prefix.
///
/// Namespaces must be non-empty and must not contain the null byte, which
/// the in-memory store uses as the namespace/key separator.
pub(crate) fn validate_namespace(namespace: &str) -> StorageResult<()> {
    if namespace.is_empty() {
        return Err(StorageError::InvalidKey(
            "namespace must not be empty".into(),
        ));
    }
    if namespace.contains('\0') {
        return Err(StorageError::InvalidKey(
            "namespace must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Validate that a key is safe for storage.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Namespaced key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by namespace and key.
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Set a value, overwriting any existing one.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// Check if a key exists in a namespace.
    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    /// List all keys in a namespace.
    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Delete all keys in a namespace, returning how many were removed.
    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64>;
}

/// In-memory key-value store.
///
/// Keys are stored as `"{namespace}\0{key}"` in a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{namespace}\0{key}")
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.get(&Self::full_key(namespace, key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        data.insert(Self::full_key(namespace, key), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.remove(&Self::full_key(namespace, key)).is_some())
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let prefix = format!("{namespace}\0");
        let mut keys: Vec<String> = data
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let prefix = format!("{namespace}\0");
        let before = data.len();
        data.retain(|k, _| !k.starts_with(&prefix));
        Ok(u64::try_from(before.saturating_sub(data.len())).unwrap_or(u64::MAX))
    }
}

/// A store view pre-bound to one namespace.
///
/// The registry service holds one of these for the `mfe` namespace and never
/// deals with namespaces directly.
#[derive(Clone)]
pub struct ScopedKvStore {
    inner: Arc<dyn KvStore>,
    namespace: String,
}

impl std::fmt::Debug for ScopedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedKvStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ScopedKvStore {
    /// Create a scoped view into `store` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the namespace is empty or
    /// contains null bytes.
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> StorageResult<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            inner: store,
            namespace,
        })
    }

    /// The namespace this store is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get a raw value by key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is invalid, or any
    /// backend error.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.inner.get(&self.namespace, key).await
    }

    /// Set a raw value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is invalid, or any
    /// backend error.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        self.inner.set(&self.namespace, key, value).await
    }

    /// Delete a key. Returns `true` if the key existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the key is invalid, or any
    /// backend error.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.inner.delete(&self.namespace, key).await
    }

    /// Delete every key in this namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store operation fails.
    pub async fn clear(&self) -> StorageResult<u64> {
        self.inner.clear_namespace(&self.namespace).await
    }

    /// Deserialize a JSON value from the store.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if deserialization fails.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let bytes = self.get(key).await?;
        bytes
            .map(|b| {
                serde_json::from_slice(&b).map_err(|e| StorageError::Serialization(e.to_string()))
            })
            .transpose()
    }

    /// Serialize a value as JSON and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails.
    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set_overwrite() {
        let store = MemoryKvStore::new();
        assert!(store.get("ns", "k").await.unwrap().is_none());
        store.set("ns", "k", b"v1".to_vec()).await.unwrap();
        store.set("ns", "k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"v2".to_vec()));
        assert!(store.exists("ns", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryKvStore::new();
        store.set("ns", "k", b"v".to_vec()).await.unwrap();
        assert!(store.delete("ns", "k").await.unwrap());
        assert!(!store.delete("ns", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_namespace_isolation_and_clear() {
        let store = MemoryKvStore::new();
        store.set("a", "x", b"1".to_vec()).await.unwrap();
        store.set("a", "y", b"2".to_vec()).await.unwrap();
        store.set("b", "x", b"3".to_vec()).await.unwrap();

        assert_eq!(store.list_keys("a").await.unwrap(), vec!["x", "y"]);
        assert_eq!(store.clear_namespace("a").await.unwrap(), 2);
        assert!(store.list_keys("a").await.unwrap().is_empty());
        assert_eq!(store.get("b", "x").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_rejects_invalid_keys() {
        let store = MemoryKvStore::new();
        assert!(store.set("", "k", vec![]).await.is_err());
        assert!(store.set("ns", "", vec![]).await.is_err());
        assert!(store.set("ns", "a\0b", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_scoped_json_round_trip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Entry {
            hits: u32,
        }

        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let scoped = ScopedKvStore::new(Arc::clone(&store), "mfe").unwrap();
        scoped.set_json("entry", &Entry { hits: 3 }).await.unwrap();

        let back: Option<Entry> = scoped.get_json("entry").await.unwrap();
        assert_eq!(back, Some(Entry { hits: 3 }));
        assert!(store.exists("mfe", "entry").await.unwrap());
    }

    #[tokio::test]
    async fn test_scoped_get_json_reports_corruption() {
        let scoped = ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "mfe").unwrap();
        scoped.set("entry", b"{not json".to_vec()).await.unwrap();
        let result: StorageResult<Option<serde_json::Value>> = scoped.get_json("entry").await;
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[test]
    fn test_scoped_rejects_empty_namespace() {
        assert!(ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "").is_err());
    }
}

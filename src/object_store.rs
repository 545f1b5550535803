//! Key-value object stores holding Zarr hierarchies.

use crate::error::ExplorerError;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::Instrument;

/// A read-only store of objects addressed by `/`-separated keys.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// Returns the object stored under `key`, or `None` if there is no such object.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ExplorerError>;

    /// Returns a human readable description of the store for logging.
    fn describe(&self) -> String;
}

/// A store backed by a directory on the local filesystem.
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ExplorerError> {
        let path = self.root.join(key);
        let span = tracing::debug_span!("filesystem_read", path = %path.display());
        match tokio::fs::read(&path).instrument(span).await {
            Ok(data) => Ok(Some(data.into())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ExplorerError::StoreRead {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// A store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object, replacing any previous object with the same key.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        // A poisoned lock only means that a writer panicked; the map itself is still usable.
        let mut objects = self.objects.write().unwrap_or_else(|err| err.into_inner());
        objects.insert(key.into(), data.into());
    }

    /// Removes an object, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut objects = self.objects.write().unwrap_or_else(|err| err.into_inner());
        objects.remove(key).is_some()
    }

    /// Returns the number of objects in the store.
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the keys of all objects, sorted.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|err| err.into_inner());
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ExplorerError> {
        let objects = self.objects.read().unwrap_or_else(|err| err.into_inner());
        Ok(objects.get(key).cloned())
    }

    fn describe(&self) -> String {
        format!("memory ({} objects)", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.insert("a/.zarray", b"{}".as_ref());
        assert_eq!(1, store.len());
        assert_eq!(vec!["a/.zarray".to_string()], store.keys());
        assert_eq!(
            Some(Bytes::from_static(b"{}")),
            store.get("a/.zarray").await.unwrap()
        );
        assert_eq!(None, store.get("b/.zarray").await.unwrap());
        assert!(store.remove("a/.zarray"));
        assert!(!store.remove("a/.zarray"));
        assert_eq!("memory (0 objects)", store.describe());
    }

    #[tokio::test]
    async fn test_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("t_mean")).unwrap();
        std::fs::write(dir.path().join("t_mean/0.0"), [1u8, 2, 3]).unwrap();
        let store = FilesystemStore::new(dir.path());
        assert_eq!(
            Some(Bytes::from_static(&[1, 2, 3])),
            store.get("t_mean/0.0").await.unwrap()
        );
        assert_eq!(None, store.get("t_mean/0.1").await.unwrap());
        assert!(store.describe().starts_with("file://"));
    }

    #[tokio::test]
    async fn test_filesystem_store_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("t_mean")).unwrap();
        let store = FilesystemStore::new(dir.path());
        // Reading a directory fails with an error other than NotFound.
        match store.get("t_mean").await.unwrap_err() {
            ExplorerError::StoreRead { key, .. } => assert_eq!("t_mean", key),
            err => panic!("unexpected error {}", err),
        }
    }
}

//! Storage boundary for raw uploaded files.
//!
//! The pipeline only needs "fetch bytes by key" and "metadata by key";
//! `put_bytes` is used by registration (`ingest files add`) and tests.
//! Keys are relative, `/`-separated paths.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::extract::DocumentFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub content_length: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;
    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata>;
    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Objects stored as files under a root directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key under the root, rejecting absolute paths and `..`.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("invalid object key: '{}'", key);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read object {}", path.display()))
    }

    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let path = self.resolve(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("failed to stat object {}", path.display()))?;
        Ok(ObjectMetadata {
            content_type: DocumentFormat::mime_for_filename(key).to_string(),
            content_length: meta.len(),
        })
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write object {}", path.display()))
    }
}

/// In-memory object store for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().map_err(|_| anyhow::anyhow!("lock poisoned"))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("object not found: {}", key))
    }

    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let objects = self.objects.read().map_err(|_| anyhow::anyhow!("lock poisoned"))?;
        let bytes = objects
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("object not found: {}", key))?;
        Ok(ObjectMetadata {
            content_type: DocumentFormat::mime_for_filename(key).to_string(),
            content_length: bytes.len() as u64,
        })
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| anyhow::anyhow!("lock poisoned"))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fs_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path());
        store.put_bytes("p1/notes.md", b"# Hi").await.unwrap();

        assert_eq!(store.get_bytes("p1/notes.md").await.unwrap(), b"# Hi");
        let meta = store.get_metadata("p1/notes.md").await.unwrap();
        assert_eq!(meta.content_length, 4);
        assert_eq!(meta.content_type, "text/markdown");
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_keys() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path());
        assert!(store.get_bytes("../etc/passwd").await.is_err());
        assert!(store.get_bytes("/etc/passwd").await.is_err());
        assert!(store.put_bytes("", b"x").await.is_err());
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let store = MemoryObjectStore::new();
        let err = store.get_bytes("nope.txt").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}

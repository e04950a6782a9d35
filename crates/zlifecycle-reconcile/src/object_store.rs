// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage abstraction for plan/apply logs and state files.
//!
//! Buckets hold objects addressed by `/`-separated keys. The engine only
//! needs list-by-prefix, whole-object reads and whole-object writes.
//! [`MemoryObjectStore`] backs tests; [`FsObjectStore`] maps
//! `bucket/key` onto a directory tree for single-node deployments.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Object storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The key would escape its bucket or is otherwise unusable.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport or backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for object storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key within its bucket.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Lists objects whose key starts with `prefix`.
    ///
    /// Returns an empty vec if nothing matches or the bucket does not exist.
    /// Order is unspecified; callers needing a stable order sort by key.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>>;

    /// Reads an entire object.
    ///
    /// Returns [`StorageError::NotFound`] if the object doesn't exist.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Writes an entire object, replacing any previous content.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// In-memory object store for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
}

impl MemoryObjectStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("lock poisoned".into())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), obj)| ObjectMeta {
                key: key.clone(),
                size: obj.data.len() as u64,
                last_modified: Some(obj.last_modified),
            })
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.objects.write().map_err(|_| poisoned())?.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// Filesystem object store rooted at a directory.
///
/// Object `key` of `bucket` lives at `root/bucket/key`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        check_relative(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        check_relative(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }
}

/// Rejects empty, absolute and parent-escaping names.
fn check_relative(name: &str) -> StorageResult<()> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(StorageError::InvalidKey(name.to_string()));
    }
    Ok(())
}

fn key_of(bucket_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_dir).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let mut pending = vec![bucket_dir.clone()];
        let mut found = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                let path = entry.path();
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Some(key) = key_of(&bucket_dir, &path) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }

                found.push(ObjectMeta {
                    key,
                    size: metadata.len(),
                    last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        Ok(found)
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_list() {
        let store = MemoryObjectStore::new();
        store
            .put("logs", "platform/dev/vpc/1/plan_output", Bytes::from("plan"))
            .await
            .unwrap();
        store
            .put("other", "platform/dev/vpc/1/plan_output", Bytes::from("x"))
            .await
            .unwrap();

        assert_eq!(
            store.get("logs", "platform/dev/vpc/1/plan_output").await.unwrap(),
            Bytes::from("plan")
        );

        let listed = store.list("logs", "platform/dev/vpc/1/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 4);

        let err = store.get("logs", "missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fs_store_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("logs", "platform/dev/vpc/1/plan_output", Bytes::from("plan"))
            .await
            .unwrap();
        store
            .put("logs", "platform/dev/vpc/1/apply_output", Bytes::from("apply"))
            .await
            .unwrap();
        store
            .put("logs", "platform/dev/vpc/2/plan_output", Bytes::from("later"))
            .await
            .unwrap();

        let mut keys: Vec<_> = store
            .list("logs", "platform/dev/vpc/1/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "platform/dev/vpc/1/apply_output".to_string(),
                "platform/dev/vpc/1/plan_output".to_string(),
            ]
        );

        assert_eq!(
            store.get("logs", "platform/dev/vpc/2/plan_output").await.unwrap(),
            Bytes::from("later")
        );
    }

    #[tokio::test]
    async fn test_fs_store_missing_bucket_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(store.list("nope", "").await.unwrap().is_empty());
        assert!(matches!(
            store.get("nope", "a/b").await.unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        for key in ["../secret", "/etc/passwd", ""] {
            let err = store.put("logs", key, Bytes::new()).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "key {key:?}");
        }
    }
}

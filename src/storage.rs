//! # Storage Adapter
//!
//! Persistence seam for uploaded media and produced transcripts. The job
//! core never inspects the bytes it stores; it only carries opaque
//! `StorageRef` handles on the job records. Keeping this behind a trait
//! lets the worker and handlers share an `Arc<dyn Storage>` and lets tests
//! run against the in-memory implementation.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

/// Opaque reference to a stored blob.
///
/// For filesystem storage this is the file name relative to the storage
/// root; consumers must not rely on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageRef(String);

impl StorageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StorageRef {
    fn from(s: &str) -> Self {
        StorageRef(s.to_string())
    }
}

impl From<String> for StorageRef {
    fn from(s: String) -> Self {
        StorageRef(s)
    }
}

impl std::fmt::Display for StorageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Put/get-by-reference storage contract.
///
/// `label` is a human-oriented hint (usually the uploaded file name) that
/// implementations may fold into the reference; it carries no semantics.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, bytes: &[u8], label: &str) -> AppResult<StorageRef>;
    async fn get(&self, reference: &StorageRef) -> AppResult<Vec<u8>>;
}

/// Filesystem-backed storage rooted at a single directory.
///
/// Blobs are written as `<uuid>_<label>` so concurrent uploads of files
/// with the same name never collide, and so a glance at the directory
/// still shows what each blob is.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open (and create if needed) a storage directory.
    pub fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Strip anything path-like out of a client-supplied label.
    fn sanitize(label: &str) -> String {
        let name = label.rsplit(['/', '\\']).next().unwrap_or(label);
        let name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if name.is_empty() {
            "blob".to_string()
        } else {
            name
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn put(&self, bytes: &[u8], label: &str) -> AppResult<StorageRef> {
        let name = format!("{}_{}", Uuid::new_v4(), Self::sanitize(label));
        let path = self.root.join(&name);
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored blob");
        Ok(StorageRef(name))
    }

    async fn get(&self, reference: &StorageRef) -> AppResult<Vec<u8>> {
        // References are generated server-side, but re-check them anyway so
        // a forged reference cannot escape the storage root.
        if reference.0.contains('/') || reference.0.contains("..") {
            return Err(AppError::NotFound(format!("Unknown blob: {}", reference)));
        }
        let path = self.root.join(&reference.0);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Unknown blob: {}", reference)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory storage used by tests and ephemeral deployments.
pub struct MemoryStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { blobs: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, bytes: &[u8], label: &str) -> AppResult<StorageRef> {
        let name = format!("{}_{}", Uuid::new_v4(), label);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| AppError::Internal("storage lock poisoned".to_string()))?;
        blobs.insert(name.clone(), bytes.to_vec());
        Ok(StorageRef(name))
    }

    async fn get(&self, reference: &StorageRef) -> AppResult<Vec<u8>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| AppError::Internal("storage lock poisoned".to_string()))?;
        blobs
            .get(&reference.0)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown blob: {}", reference)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_storage_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();

        let reference = storage.put(b"hello audio", "clip.wav").await.unwrap();
        assert!(reference.as_str().ends_with("_clip.wav"));

        let bytes = storage.get(&reference).await.unwrap();
        assert_eq!(bytes, b"hello audio");
    }

    #[tokio::test]
    async fn test_fs_storage_unknown_ref_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();

        let result = storage.get(&StorageRef::from("nope.wav")).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fs_storage_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();

        let result = storage.get(&StorageRef::from("../etc/passwd")).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(FsStorage::sanitize("/tmp/../evil.wav"), "evil.wav");
        assert_eq!(FsStorage::sanitize("spaces in name.mp3"), "spaces_in_name.mp3");
        assert_eq!(FsStorage::sanitize(""), "blob");
    }

    #[tokio::test]
    async fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        let reference = storage.put(b"transcript text", "out.txt").await.unwrap();
        assert_eq!(storage.get(&reference).await.unwrap(), b"transcript text");

        let missing = storage.get(&StorageRef::from("missing")).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }
}

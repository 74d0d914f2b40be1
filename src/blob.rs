//! Object storage for mirrored notice images.
//!
//! Keys are `/`-separated paths inside one bucket (`{entity_id}/image_{n}.png`).
//! [`FsBlobStore`] maps a bucket onto a directory; [`MemoryBlobStore`] keeps
//! objects in memory for tests.

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::fs;
use tracing::trace;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),
    #[error("blob io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `data` under `key`, replacing any previous object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
}

/// Rejects keys that could escape the bucket or name a directory.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let bad = key.is_empty()
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// A bucket stored as a directory tree: key `a/b/c.png` lives at `{root}/{bucket}/a/b/c.png`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Result<Self, BlobError> {
        validate_key(bucket)?;
        if bucket.contains('/') {
            return Err(BlobError::InvalidKey(bucket.to_string()));
        }
        Ok(Self {
            dir: root.as_ref().join(bucket),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.dir.clone(), |path, segment| path.join(segment)))
    }
}

fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> BlobError + '_ {
    move |source| BlobError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error(key))?;
        }

        // Write beside the target, then rename over it.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &data).await.map_err(io_error(key))?;
        fs::rename(&tmp, &path).await.map_err(io_error(key))?;

        trace!(key, content_type, bytes = data.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key)(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.dir.clone(), String::new())];

        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&key_prefix)(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_error(&key_prefix))? {
                let name = entry.file_name().to_string_lossy().to_string();
                let key = format!("{key_prefix}{name}");
                let file_type = entry.file_type().await.map_err(io_error(&key))?;
                if file_type.is_dir() {
                    // Only descend where keys under this directory can still match.
                    let dir_key = format!("{key}/");
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), dir_key));
                    }
                } else if !name.ends_with(".partial") && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct MemoryBlobs {
    objects: BTreeMap<String, StoredBlob>,
    failing: FxHashMap<String, u32>,
}

/// In-process bucket. Cloning shares the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<MemoryBlobs>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBlobs> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` puts for `key` fail.
    pub fn fail_puts(&self, key: &str, n: u32) {
        *self.lock().failing.entry(key.to_string()).or_default() += n;
    }

    pub fn object(&self, key: &str) -> Option<StoredBlob> {
        self.lock().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), BlobError> {
        validate_key(key)?;
        let mut inner = self.lock();
        if let Some(remaining) = inner.failing.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BlobError::Unavailable(format!("injected fault for {key}")));
            }
        }
        inner.objects.insert(
            key.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BlobError> {
        validate_key(key)?;
        Ok(self.lock().objects.get(key).map(|blob| blob.data.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        Ok(self
            .lock()
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

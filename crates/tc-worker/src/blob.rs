//! Blob storage for task inputs and outputs.
//!
//! [`BlobStore`] is the contract the worker moves files through.
//! [`FsBlobStore`] keeps each bucket as a directory under a root, which is
//! enough for a single host or a shared volume.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tc_core::{Error, Result};
use tokio::fs::File;

/// Streamed object transfer.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy `bucket/key` to the local file `dest`. Returns bytes copied.
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64>;

    /// Copy the local file `src` to `bucket/key`. Returns bytes copied.
    async fn put_object(&self, bucket: &str, key: &str, src: &Path) -> Result<u64>;
}

/// Buckets as directories under `root`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        if bucket.is_empty() {
            return Err(Error::transport("blob: empty bucket name"));
        }
        let relative = Path::new(bucket).join(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::transport(format!(
                "blob: invalid object path {bucket}/{key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        let mut reader = File::open(&path)
            .await
            .map_err(|e| Error::transport(format!("blob: get {bucket}/{key}: {e}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut writer = File::create(dest).await?;
        let n = tokio::io::copy(&mut reader, &mut writer).await?;
        tracing::debug!(bucket, key, bytes = n, "Fetched object");
        Ok(n)
    }

    async fn put_object(&self, bucket: &str, key: &str, src: &Path) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transport(format!("blob: put {bucket}/{key}: {e}")))?;
        }

        // Readers never see a half-written object.
        let partial = path.with_extension("part");
        let mut reader = File::open(src).await?;
        let mut writer = File::create(&partial)
            .await
            .map_err(|e| Error::transport(format!("blob: put {bucket}/{key}: {e}")))?;
        let n = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.sync_all().await?;
        drop(writer);
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| Error::transport(format!("blob: put {bucket}/{key}: {e}")))?;

        tracing::debug!(bucket, key, bytes = n, "Stored object");
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(root.path());

        let src = work.path().join("clip.mp4");
        std::fs::write(&src, b"frames").unwrap();
        assert_eq!(store.put_object("out", "a/b/clip.mp4", &src).await.unwrap(), 6);
        assert!(root.path().join("out/a/b/clip.mp4").exists());
        assert!(!root.path().join("out/a/b/clip.part").exists());

        let dest = work.path().join("copy/clip.mp4");
        store.get_object("out", "a/b/clip.mp4", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"frames");
    }

    #[tokio::test]
    async fn missing_object_is_a_transport_error() {
        let root = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(root.path());
        let err = store
            .get_object("in", "nope.mp4", &root.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn rejects_path_escape() {
        let root = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(root.path());
        assert!(store.object_path("in", "../etc/passwd").is_err());
        assert!(store.object_path("", "a.mp4").is_err());
        assert!(store.object_path("in", "/abs.mp4").is_err());
    }
}

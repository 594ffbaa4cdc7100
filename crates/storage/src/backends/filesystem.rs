//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobMeta, BlobStore, ByteStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Canonicalization and symlink checks block, so they run on the
    /// blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Reject keys that would resolve outside the root, including through
    /// symlinks on the path or on the nearest existing ancestor.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize path: {e}"),
                            ))
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    candidate = current.parent();
                }
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat path: {err}"),
                    )));
                }
            }
        }

        Ok(path)
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Sibling temp path so the final rename stays on one filesystem.
    fn temp_path(path: &Path) -> PathBuf {
        let suffix = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{suffix}", n.to_string_lossy()))
                .unwrap_or(suffix),
        )
    }

    /// Remove now-empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root {
                break;
            }
            // Fails on non-empty directories, which ends the walk
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<BlobMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;

        Ok(BlobMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_path(key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        // Write, fsync, then rename so readers never see a torn object
        let temp_path = Self::temp_path(&path);
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        self.prune_empty_parents(&path).await;
        Ok(())
    }

    #[instrument(skip(self, sources), fields(backend = "filesystem", parts = sources.len()))]
    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<u64> {
        if sources.is_empty() {
            return Err(StorageError::EmptyCompose);
        }

        let dest_path = self.key_path(dest).await?;
        self.ensure_parent(&dest_path).await?;
        let temp_path = Self::temp_path(&dest_path);

        let result: StorageResult<u64> = async {
            let mut out = fs::File::create(&temp_path).await?;
            let mut total = 0u64;
            for source in sources {
                let source_path = self.key_path(source).await?;
                let mut input = fs::File::open(&source_path)
                    .await
                    .map_err(|e| not_found_or_io(source, e))?;
                total += tokio::io::copy(&mut input, &mut out).await?;
            }
            out.sync_all().await?;
            Ok(total)
        }
        .await;

        match result {
            Ok(total) => {
                if let Err(e) = fs::rename(&temp_path, &dest_path).await {
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(e.into());
                }
                Ok(total)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut results = Vec::new();
        let base_path = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.key_path(prefix.trim_end_matches('/')).await?
        };

        match fs::try_exists(&base_path).await {
            Ok(false) => return Ok(results),
            Ok(true) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; symlinks are skipped
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && !path.to_string_lossy().contains(".tmp.")
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    results.push(rel.to_string_lossy().to_string());
                }
            }
        }

        results.sort();
        Ok(results)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let data = Bytes::from("hello world");
        backend.put("files/abc", data.clone()).await.unwrap();
        assert!(backend.exists("files/abc").await.unwrap());
        assert_eq!(backend.get("files/abc").await.unwrap(), data);
        assert_eq!(backend.head("files/abc").await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_missing_object_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(matches!(
            backend.get("files/nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            backend.delete("files/nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!backend.exists("files/nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_stream_yields_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        backend.put("files/big", Bytes::from(data.clone())).await.unwrap();

        let chunks: Vec<Bytes> = backend
            .get_stream("files/big")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.len() > 1, "large objects should stream in pieces");
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_compose_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend.put("multipart/s/0", Bytes::from("ab")).await.unwrap();
        backend.put("multipart/s/1", Bytes::from("cd")).await.unwrap();
        backend.put("multipart/s/2", Bytes::from("e")).await.unwrap();

        let sources: Vec<String> = (0..3).map(|i| format!("multipart/s/{i}")).collect();
        let size = backend.compose("files/out", &sources).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(backend.get("files/out").await.unwrap(), Bytes::from("abcde"));
        assert!(
            backend.exists("multipart/s/0").await.unwrap(),
            "sources must survive compose"
        );
    }

    #[tokio::test]
    async fn test_compose_missing_source_leaves_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend.put("multipart/s/0", Bytes::from("ab")).await.unwrap();
        let sources = vec!["multipart/s/0".to_string(), "multipart/s/1".to_string()];
        let result = backend.compose("files/out", &sources).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!backend.exists("files/out").await.unwrap());
        assert_eq!(backend.list("files").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_compose_rejects_empty_sources() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        assert!(matches!(
            backend.compose("files/out", &[]).await,
            Err(StorageError::EmptyCompose)
        ));
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_session_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend.put("multipart/s/0", Bytes::from("ab")).await.unwrap();
        backend.put("multipart/s/1", Bytes::from("cd")).await.unwrap();
        backend.delete("multipart/s/0").await.unwrap();
        assert!(dir.path().join("multipart/s").exists());
        backend.delete("multipart/s/1").await.unwrap();
        assert!(!dir.path().join("multipart/s").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_list_returns_sorted_relative_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend.put("files/b", Bytes::from("1")).await.unwrap();
        backend.put("files/a", Bytes::from("2")).await.unwrap();
        backend.put("multipart/x/0", Bytes::from("3")).await.unwrap();

        assert_eq!(
            backend.list("files/").await.unwrap(),
            vec!["files/a".to_string(), "files/b".to_string()]
        );
        assert_eq!(backend.list("").await.unwrap().len(), 3);
        assert!(backend.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let outside_file = outside_dir.path().join("secret.txt");
        std::fs::write(&outside_file, "secret data").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        symlink(&outside_file, dir.path().join("malicious_link")).unwrap();

        match backend.get("malicious_link").await {
            Err(StorageError::InvalidKey(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }

        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();
        let result = backend
            .put("escape/nested/file.txt", Bytes::from("data"))
            .await;
        assert!(result.is_err(), "ancestor symlink traversal should be rejected");
        assert!(!outside_dir.path().join("nested").exists());
    }
}

//! Blob store behavior the upload pipeline relies on.

mod common;

use bytes::Bytes;
use common::{seeded_bytes, split_chunks};
use futures::TryStreamExt;
use silo_core::{ContentHash, SessionId};
use silo_storage::{BlobStore, BlobStoreExt, FilesystemBackend, StorageError};
use std::sync::Arc;

async fn backend() -> (tempfile::TempDir, Arc<FilesystemBackend>) {
    let dir = tempfile::tempdir().unwrap();
    let backend = FilesystemBackend::new(dir.path().join("blobs")).await.unwrap();
    (dir, Arc::new(backend))
}

#[tokio::test]
async fn compose_of_session_chunks_reproduces_content_hash() {
    let (_dir, store) = backend().await;
    let data = seeded_bytes(7, 300_000);
    let hash = ContentHash::compute(&data);
    let session = SessionId::new();

    let chunks = split_chunks(&data, 64 * 1024);
    let mut keys = Vec::new();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let key = session.chunk_key(i as u64);
        store.put(&key, chunk).await.unwrap();
        keys.push(key);
    }

    let size = store.compose(&hash.blob_key(), &keys).await.unwrap();
    assert_eq!(size, data.len() as u64);

    let mut hasher = ContentHash::hasher();
    let mut stream = store.get_stream(&hash.blob_key()).await.unwrap();
    while let Some(piece) = stream.try_next().await.unwrap() {
        hasher.update(&piece);
    }
    assert_eq!(hasher.finalize(), hash);
}

#[tokio::test]
async fn concurrent_puts_of_same_key_leave_one_complete_object() {
    let (_dir, store) = backend().await;
    let data = seeded_bytes(3, 256 * 1024);
    let key = ContentHash::compute(&data).blob_key();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let data = data.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { store.put(&key, data).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.get(&key).await.unwrap(), data);
    assert_eq!(store.list("files/").await.unwrap(), vec![key]);
}

#[tokio::test]
async fn delete_if_exists_is_idempotent() {
    let (_dir, store) = backend().await;
    store.put("files/x", Bytes::from_static(b"x")).await.unwrap();

    assert!(store.delete_if_exists("files/x").await.unwrap());
    assert!(!store.delete_if_exists("files/x").await.unwrap());
    assert!(matches!(
        store.get("files/x").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn removing_chunks_after_compose_keeps_final_blob() {
    let (_dir, store) = backend().await;
    let session = SessionId::new();
    let keys: Vec<String> = (0..3).map(|i| session.chunk_key(i)).collect();
    for (i, key) in keys.iter().enumerate() {
        store
            .put(key, Bytes::from(vec![i as u8; 10]))
            .await
            .unwrap();
    }
    store.compose("files/final", &keys).await.unwrap();

    for key in &keys {
        store.delete(key).await.unwrap();
    }

    assert!(store.list("multipart/").await.unwrap().is_empty());
    assert_eq!(store.head("files/final").await.unwrap().size, 30);
}

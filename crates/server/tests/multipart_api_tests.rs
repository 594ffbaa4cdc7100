//! Integration tests for the multipart endpoints.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use bytes::Bytes;
use common::TestServer;
use common::fixtures::{seeded_bytes, sha256_hash, split_chunks};
use serde_json::{Value, json};
use silo_core::MIN_CHUNK_SIZE;
use std::time::Duration;

const CHUNK: usize = MIN_CHUNK_SIZE as usize;

async fn init(server: &TestServer, user: &str, hash: &str, size: usize) -> (StatusCode, Value) {
    server
        .json(
            "POST",
            "/v1/multipart",
            Some(user),
            Some(json!({"hash": hash, "file_name": "video.mp4", "size": size})),
        )
        .await
}

async fn put_chunk(
    server: &TestServer,
    user: &str,
    session: &str,
    index: u64,
    data: Bytes,
) -> (StatusCode, Value) {
    let (status, _, body) = server
        .send(
            "PUT",
            &format!("/v1/multipart/{session}/chunks/{index}"),
            Some(user),
            &[],
            Body::from(data),
        )
        .await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_multipart_happy_path() {
    let server = TestServer::new().await;
    let data = seeded_bytes(1, CHUNK * 2 + CHUNK / 2);
    let hash = sha256_hash(&data);

    let (status, body) = init(&server, "alice", &hash, data.len()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["chunk_count"], 3);
    assert_eq!(body["deduplicated"], false);
    let session = body["session_id"].as_str().unwrap().to_string();

    let chunks = split_chunks(&data, CHUNK);
    // out of order on purpose
    for index in [2u64, 0] {
        let (status, receipt) =
            put_chunk(&server, "alice", &session, index, chunks[index as usize].clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["index"], index);
    }

    let (status, progress) = server
        .json("GET", &format!("/v1/multipart/{session}"), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["status"], "uploading");
    assert_eq!(progress["uploaded_count"], 2);
    assert_eq!(progress["uploaded_chunks"], json!([0, 2]));
    assert_eq!(progress["progress_percent"], 66);
    assert_eq!(progress["completed"], false);

    let (status, _) = put_chunk(&server, "alice", &session, 1, chunks[1].clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, outcome) = server
        .json(
            "POST",
            &format!("/v1/multipart/{session}/complete"),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["hash"], hash);
    assert_eq!(outcome["size"], data.len());
    assert_eq!(outcome["deduplicated"], false);

    let (status, _, bytes) = server
        .send(
            "GET",
            &format!("/v1/files/{hash}"),
            Some("alice"),
            &[],
            Body::empty(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, data);

    let (_, progress) = server
        .json("GET", &format!("/v1/multipart/{session}"), Some("alice"), None)
        .await;
    assert_eq!(progress["status"], "completed");

    // temporary chunks are cleaned up in the background
    let storage = server.state.storage.clone();
    let prefix = format!("multipart/{session}");
    let cleaned = server
        .eventually(Duration::from_secs(5), || {
            let storage = storage.clone();
            let prefix = prefix.clone();
            async move { storage.list(&prefix).await.unwrap_or_default().is_empty() }
        })
        .await;
    assert!(cleaned, "temporary chunks were not removed");
}

#[tokio::test]
async fn test_multipart_rejections() {
    let server = TestServer::new().await;
    let data = seeded_bytes(2, CHUNK + 100);
    let hash = sha256_hash(&data);
    let chunks = split_chunks(&data, CHUNK);

    let (_, body) = init(&server, "alice", &hash, data.len()).await;
    let session = body["session_id"].as_str().unwrap().to_string();

    // completing early reports progress
    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/multipart/{session}/complete"),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "incomplete");

    let (status, body) = put_chunk(&server, "alice", &session, 2, chunks[0].clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "out_of_range");

    // the last chunk must be exactly the remainder
    let (status, body) =
        put_chunk(&server, "alice", &session, 1, Bytes::from(vec![0u8; 99])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = put_chunk(&server, "alice", &session, 0, chunks[0].clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = put_chunk(&server, "alice", &session, 0, chunks[0].clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
    assert_eq!(
        server
            .blobs
            .put_count(&format!("multipart/{session}/0")),
        1
    );

    // sessions are private to their owner
    let (status, _) = server
        .json("GET", &format!("/v1/multipart/{session}"), Some("bob"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = put_chunk(&server, "bob", &session, 1, chunks[1].clone()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .json("GET", "/v1/multipart/not-a-session", Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_init_validation() {
    let server = TestServer::new().await;
    let (status, _) = init(&server, "alice", "abc", 10).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let hash = sha256_hash(b"x");
    let (status, _) = init(&server, "alice", &hash, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .json(
            "POST",
            "/v1/multipart",
            Some("alice"),
            Some(json!({"hash": hash, "file_name": "  ", "size": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_init_on_live_content_short_circuits() {
    let server = TestServer::new().await;
    let data = seeded_bytes(3, 4096);
    let hash = sha256_hash(&data);
    server.upload("alice", "orig.bin", data.clone()).await;

    let (status, body) = init(&server, "bob", &hash, data.len()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deduplicated"], true);
    assert!(body["session_id"].is_null());

    let (_, files) = server.json("GET", "/v1/files", Some("bob"), None).await;
    assert_eq!(files["files"][0]["hash"], hash);
}

#[tokio::test]
async fn test_multipart_hash_mismatch_keeps_session_open() {
    let server = TestServer::new().await;
    let data = seeded_bytes(4, CHUNK + 10);
    let claimed = sha256_hash(b"something else entirely");

    let (_, body) = init(&server, "alice", &claimed, data.len()).await;
    let session = body["session_id"].as_str().unwrap().to_string();
    for (index, chunk) in split_chunks(&data, CHUNK).into_iter().enumerate() {
        let (status, _) = put_chunk(&server, "alice", &session, index as u64, chunk).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/multipart/{session}/complete"),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    assert!(
        !server
            .state
            .storage
            .exists(&format!("files/{claimed}"))
            .await
            .unwrap()
    );
    assert!(server.catalog().get_content(&claimed).await.unwrap().is_none());

    let (_, progress) = server
        .json("GET", &format!("/v1/multipart/{session}"), Some("alice"), None)
        .await;
    assert_eq!(progress["status"], "uploading");
    assert_eq!(progress["completed"], true);
    // chunks stay for inspection
    assert!(
        server
            .state
            .storage
            .exists(&format!("multipart/{session}/0"))
            .await
            .unwrap()
    );
}

//! Cache-aside fall-through and guarded batch behavior.

mod common;

use common::FlakyKvStore;
use serde::{Deserialize, Serialize};
use silo_cache::{CacheAside, KvStore, MemoryKvStore, WriteBatch};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    name: String,
    size: u64,
}

fn record() -> Record {
    Record {
        name: "a.txt".to_string(),
        size: 3,
    }
}

#[tokio::test]
async fn test_miss_fetches_and_populates() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = CacheAside::new(kv.clone(), Duration::from_secs(60));
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let got = cache
            .get_or_fetch("file-meta:x", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(Some(record()))
            })
            .await
            .unwrap();
        assert_eq!(got, Some(record()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(kv.get("file-meta:x").await.unwrap().is_some());
}

#[tokio::test]
async fn test_undecodable_entry_falls_through() {
    let kv = Arc::new(MemoryKvStore::new());
    kv.set_ex("file-meta:x", b"{not json".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();
    let cache = CacheAside::new(kv.clone(), Duration::from_secs(60));

    let got = cache
        .get_or_fetch("file-meta:x", || async { Ok::<_, Infallible>(Some(record())) })
        .await
        .unwrap();
    assert_eq!(got, Some(record()));

    // The broken entry was replaced by the fetched value.
    let raw = kv.get("file-meta:x").await.unwrap().unwrap();
    let cached: Record = serde_json::from_slice(&raw).unwrap();
    assert_eq!(cached, record());
}

#[tokio::test]
async fn test_cache_error_falls_through() {
    let kv = FlakyKvStore::new();
    kv.fail_reads(true);
    let cache = CacheAside::new(Arc::new(kv.clone()), Duration::from_secs(60));

    let got = cache
        .get_or_fetch("file-meta:x", || async { Ok::<_, Infallible>(Some(record())) })
        .await
        .unwrap();
    assert_eq!(got, Some(record()));
}

#[tokio::test]
async fn test_absence_is_not_cached() {
    let kv = Arc::new(MemoryKvStore::new());
    let cache = CacheAside::new(kv.clone(), Duration::from_secs(60));
    let calls = AtomicUsize::new(0);

    for _ in 0..2 {
        let got: Option<Record> = cache
            .get_or_fetch("file-meta:none", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(None)
            })
            .await
            .unwrap();
        assert!(got.is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(kv.is_empty());
}

#[tokio::test]
async fn test_fetch_error_is_returned() {
    let cache = CacheAside::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(60));
    let result: Result<Option<Record>, &str> = cache
        .get_or_fetch("file-meta:x", || async { Err("catalog down") })
        .await;
    assert_eq!(result, Err("catalog down"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_batches_apply_once() {
    let kv = Arc::new(MemoryKvStore::new());
    kv.hset_all(
        "info",
        &[
            ("uploaded_count".to_string(), "0".to_string()),
            ("status".to_string(), "initiated".to_string()),
        ],
        None,
    )
    .await
    .unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let kv = kv.clone();
            // Four submissions of each of four chunk indexes.
            let member = (i % 4).to_string();
            tokio::spawn(async move {
                kv.apply(
                    WriteBatch::new()
                        .require_key("info")
                        .require_not_member("chunks", member.clone())
                        .set_add("chunks", member)
                        .hash_incr_by("info", "uploaded_count", 1)
                        .hash_set_if("info", "status", "initiated", "uploading"),
                )
                .await
                .unwrap()
            })
        })
        .collect();

    let applied = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    assert_eq!(applied, 4);
    assert_eq!(kv.scard("chunks").await.unwrap(), 4);
    let info = kv.hgetall("info").await.unwrap();
    assert_eq!(info["uploaded_count"], "4");
    assert_eq!(info["status"], "uploading");
}

//! End-to-End Store Tests
//!
//! The full lifecycle through the public facade: create, update, read,
//! search, soft delete, and the interning and stats surfaces that hang
//! off it.

use std::path::Path;

use promptstore::config::StoreConfig;
use promptstore::store::{RecordFields, Store, StoreError};
use tempfile::TempDir;

fn open_store(dir: &Path) -> Store {
    Store::open(dir, &StoreConfig::default()).unwrap()
}

fn fields(title: &str, content: &str) -> RecordFields {
    RecordFields {
        title: title.to_string(),
        content: content.as_bytes().to_vec(),
        category: 0,
    }
}

#[test]
fn test_full_record_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    let id = store
        .create(fields("Swift Optimization", "How to make things fast"))
        .unwrap();

    store.update_content(id, b"New content").unwrap();
    assert_eq!(store.get(id).unwrap().content, b"New content");

    let hits = store.search("optimization", 10).unwrap();
    assert!(hits.iter().any(|h| h.id == id), "title tokens must be searchable");

    store.soft_delete(id).unwrap();
    assert!(matches!(store.get(id), Err(StoreError::NotFound(_))));
    let hits = store.search("optimization", 10).unwrap();
    assert!(!hits.iter().any(|h| h.id == id));
}

#[test]
fn test_interning_same_title_stores_one_copy() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    store.create(fields("Shared Title", "first body")).unwrap();
    let after_one = store.stats().strings;

    for n in 0..4 {
        store.create(fields("Shared Title", &format!("body {n}"))).unwrap();
    }
    let after_five = store.stats().strings;

    assert_eq!(after_five.unique, after_one.unique);
    assert_eq!(after_five.stored_bytes, after_one.stored_bytes);
    assert_eq!(after_five.total_refs, after_one.total_refs + 4);
}

#[test]
fn test_stats_track_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    let a = store.create(fields("A", "alpha content")).unwrap();
    let _b = store.create(fields("B", "beta content")).unwrap();

    let stats = store.stats();
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.live_records, 2);
    assert!(stats.content_bytes > 0);
    assert_eq!(stats.superseded_blocks, 0);

    store.update_content(a, b"alpha rewritten").unwrap();
    store.soft_delete(a).unwrap();

    let stats = store.stats();
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.live_records, 1);
    assert_eq!(stats.superseded_blocks, 2);
}

#[test]
fn test_update_unknown_or_deleted_id_fails() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    assert!(matches!(
        store.update_content(404, b"nothing"),
        Err(StoreError::NotFound(404))
    ));

    let id = store.create(fields("Gone", "soon deleted")).unwrap();
    store.soft_delete(id).unwrap();
    assert!(matches!(
        store.update_content(id, b"too late"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn test_everything_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let (kept, deleted) = {
        let store = open_store(dir.path());
        let kept = store.create(fields("Kept", "still reachable later")).unwrap();
        let deleted = store.create(fields("Deleted", "gone after reopen too")).unwrap();
        store.update_content(kept, b"updated before close").unwrap();
        store.soft_delete(deleted).unwrap();
        store.flush().unwrap();
        (kept, deleted)
    };

    let store = open_store(dir.path());
    let doc = store.get(kept).unwrap();
    assert_eq!(doc.content, b"updated before close");
    assert_eq!(doc.revision, 2);
    assert!(matches!(store.get(deleted), Err(StoreError::NotFound(_))));

    let hits = store.search("updated", 10).unwrap();
    assert!(hits.iter().any(|h| h.id == kept));
    // The pre-update content is no longer a match.
    assert!(store.search("reachable", 10).unwrap().is_empty());
    assert!(store.search("reopen", 10).unwrap().is_empty());
}

#[test]
fn test_large_content_roundtrips_through_compression() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    // Highly repetitive, well above the compression threshold.
    let body = "compressible line of text\n".repeat(4_000);
    let id = store.create(fields("Big", &body)).unwrap();

    assert_eq!(store.get(id).unwrap().content, body.as_bytes());
    // Stored form is smaller than the raw payload.
    assert!(store.stats().content_bytes < body.len() as u64);
}

#[test]
fn test_categories_and_timestamps_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(dir.path());

    let id = store
        .create(RecordFields {
            title: "Categorized".to_string(),
            content: b"body".to_vec(),
            category: 42,
        })
        .unwrap();

    let doc = store.get(id).unwrap();
    assert_eq!(doc.category, 42);
    assert_eq!(doc.created_micros, doc.modified_micros);

    store.update_content(id, b"edited").unwrap();
    let doc = store.get(id).unwrap();
    assert!(doc.modified_micros >= doc.created_micros);
}

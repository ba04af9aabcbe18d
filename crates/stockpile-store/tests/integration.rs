//! Integration tests for the stockpile-store crate.
//!
//! These tests exercise the full persistence lifecycle: load on startup,
//! mutate, checkpoint, and reload into a fresh store against real snapshot
//! files on disk (via tempfile).

use std::collections::BTreeMap;
use std::sync::Arc;

use stockpile_store::{
    CheckpointPolicy, Checkpointer, Coordinate, Entry, InventoryStore, SaveOutcome, SaveTrigger,
    SnapshotFile, StoreError,
};

fn entry(label: &str) -> Entry {
    Entry::new(label).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Restart cycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn put_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("inventory.json");

    // First run: nothing on disk.
    let file = SnapshotFile::new(&path);
    let store = Arc::new(InventoryStore::from_entries(file.load().await.unwrap()));
    assert!(store.is_empty());
    let checkpointer = Checkpointer::new(Arc::clone(&store), file, CheckpointPolicy::default());

    let mut metadata = BTreeMap::new();
    metadata.insert("quantity".to_owned(), "64".to_owned());
    metadata.insert("owner".to_owned(), "steve".to_owned());

    store.put(Coordinate::new(-100, 20, -25), entry("thing"));
    store.put(Coordinate::ORIGIN, entry("origin"));
    store.put(
        Coordinate::new(i64::MAX, i64::MIN, 0),
        Entry::with_metadata("cobblestone", metadata).unwrap(),
    );
    store.put(Coordinate::ORIGIN, entry("origin v2"));
    store.delete(Coordinate::new(5, 5, 5));

    let outcome = checkpointer
        .save_if_dirty(SaveTrigger::Shutdown)
        .await
        .unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { entries: 3, .. }));

    // Second run: a fresh store sees exactly the same contents.
    let reloaded = InventoryStore::from_entries(SnapshotFile::new(&path).load().await.unwrap());
    assert_eq!(reloaded.snapshot().entries, store.snapshot().entries);
    assert_eq!(
        reloaded.get(Coordinate::new(-100, 20, -25)),
        Some(entry("thing"))
    );
    assert_eq!(reloaded.get(Coordinate::ORIGIN), Some(entry("origin v2")));
}

#[tokio::test]
async fn reloaded_store_starts_clean() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");

    let store = Arc::new(InventoryStore::new());
    store.put(Coordinate::new(1, 1, 1), entry("a"));
    let cp = Checkpointer::new(
        Arc::clone(&store),
        SnapshotFile::new(&path),
        CheckpointPolicy::default(),
    );
    cp.flush().await.unwrap();

    let file = SnapshotFile::new(&path);
    let reloaded = Arc::new(InventoryStore::from_entries(file.load().await.unwrap()));
    let cp = Checkpointer::new(reloaded, file, CheckpointPolicy::default());
    assert!(!cp.is_dirty());
    assert_eq!(
        cp.save_if_dirty(SaveTrigger::Interval).await.unwrap(),
        SaveOutcome::Clean
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Corruption
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn corrupt_snapshot_refuses_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");
    std::fs::write(&path, b"{\"format\": \"stockpile-snapshot\", \"vers").unwrap();

    let err = SnapshotFile::new(&path).load().await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert!(err.to_string().contains("inventory.json"));
}

#[tokio::test]
async fn leftover_temp_file_does_not_affect_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");

    let store = Arc::new(InventoryStore::new());
    store.put(Coordinate::new(7, 8, 9), entry("kept"));
    Checkpointer::new(
        Arc::clone(&store),
        SnapshotFile::new(&path),
        CheckpointPolicy::default(),
    )
    .flush()
    .await
    .unwrap();

    // Garbage left behind by a save that died before its rename.
    std::fs::write(dir.path().join("inventory.json.tmp"), b"{\"format\": \"sto").unwrap();

    let loaded = SnapshotFile::new(&path).load().await.unwrap();
    assert_eq!(loaded, vec![(Coordinate::new(7, 8, 9), entry("kept"))]);
}

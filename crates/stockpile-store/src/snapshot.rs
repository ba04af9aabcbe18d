//! Durable snapshot file.
//!
//! The whole inventory is written as one self-describing JSON document:
//!
//! ```text
//! {
//!   "format": "stockpile-snapshot",
//!   "version": 1,
//!   "saved_at": "2026-01-01T00:00:00Z",
//!   "entry_count": 2,
//!   "checksum": "<sha256 of the serialized entries array>",
//!   "entries": [{"coordinate": {"x": 0, "y": 0, "z": 0}, "entry": {"label": "origin"}}]
//! }
//! ```
//!
//! Saves go to a sibling `<name>.tmp` file which is fsynced and then renamed
//! over the target, so an interrupted save leaves the previous snapshot
//! intact.  Loads verify the header, the entry count, the checksum and key
//! uniqueness; anything off is reported as [`StoreError::Corrupt`].

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ring::digest;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::inventory::Snapshot;
use crate::model::{Coordinate, Entry};

/// Value of the `format` header field.
pub const SNAPSHOT_FORMAT: &str = "stockpile-snapshot";

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One `(coordinate, entry)` pair as stored on disk.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    coordinate: Coordinate,
    entry: Entry,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    format: String,
    version: u32,
    saved_at: DateTime<Utc>,
    entry_count: usize,
    checksum: String,
    entries: Vec<SnapshotRecord>,
}

/// Handle to the snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    temp_path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("snapshot"));
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);
        Self { path, temp_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot.  A missing file is a first run and yields no
    /// entries; an unreadable or inconsistent file is an error.
    pub async fn load(&self) -> StoreResult<Vec<(Coordinate, Entry)>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if fs::metadata(&self.temp_path).await.is_ok() {
                    warn!(
                        temp = %self.temp_path.display(),
                        "found an uncommitted snapshot from an interrupted save, ignoring it"
                    );
                }
                info!(path = %self.path.display(), "no snapshot found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let entries = decode(&self.path, &bytes)?;
        info!(path = %self.path.display(), entries = entries.len(), "snapshot loaded");
        Ok(entries)
    }

    /// Atomically replace the snapshot with `snapshot`.
    pub async fn save(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let bytes = encode(snapshot)?;
        self.stage(&bytes).await?;
        self.commit().await?;
        debug!(
            path = %self.path.display(),
            entries = snapshot.len(),
            bytes = bytes.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Write `bytes` to the temp file and flush it to disk.
    async fn stage(&self, bytes: &[u8]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = fs::File::create(&self.temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Rename the staged temp file over the target.
    async fn commit(&self) -> StoreResult<()> {
        if let Err(e) = fs::rename(&self.temp_path, &self.path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(e.into());
        }
        self.sync_parent_dir().await;
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_parent_dir(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let dir = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        match fs::File::open(dir).await {
            Ok(handle) => {
                if let Err(e) = handle.sync_all().await {
                    debug!(error = %e, "directory fsync failed");
                }
            }
            Err(e) => debug!(error = %e, "could not open snapshot directory for fsync"),
        }
    }

    #[cfg(not(unix))]
    async fn sync_parent_dir(&self) {}
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn checksum_hex(bytes: &[u8]) -> String {
    digest::digest(&digest::SHA256, bytes)
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn encode(snapshot: &Snapshot) -> StoreResult<Vec<u8>> {
    let entries: Vec<SnapshotRecord> = snapshot
        .entries
        .iter()
        .map(|(coordinate, entry)| SnapshotRecord {
            coordinate: *coordinate,
            entry: entry.clone(),
        })
        .collect();
    let checksum = checksum_hex(&serde_json::to_vec(&entries)?);

    let document = SnapshotDocument {
        format: SNAPSHOT_FORMAT.to_owned(),
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        entry_count: entries.len(),
        checksum,
        entries,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

fn decode(path: &Path, bytes: &[u8]) -> StoreResult<Vec<(Coordinate, Entry)>> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let document: SnapshotDocument =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unparsable document: {e}")))?;

    if document.format != SNAPSHOT_FORMAT {
        return Err(corrupt(format!("unexpected format `{}`", document.format)));
    }
    if document.version != SNAPSHOT_VERSION {
        return Err(corrupt(format!(
            "unsupported version {} (expected {SNAPSHOT_VERSION})",
            document.version
        )));
    }
    if document.entry_count != document.entries.len() {
        return Err(corrupt(format!(
            "header says {} entries, found {}",
            document.entry_count,
            document.entries.len()
        )));
    }

    let actual = checksum_hex(&serde_json::to_vec(&document.entries)?);
    if actual != document.checksum {
        return Err(corrupt("checksum mismatch".into()));
    }

    let mut seen = HashSet::with_capacity(document.entries.len());
    let mut entries = Vec::with_capacity(document.entries.len());
    for record in document.entries {
        if !seen.insert(record.coordinate) {
            return Err(corrupt(format!(
                "duplicate coordinate {}",
                record.coordinate
            )));
        }
        entries.push((record.coordinate, record.entry));
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryStore;

    fn sample_store() -> InventoryStore {
        let store = InventoryStore::new();
        store.put(Coordinate::new(-100, 20, -25), Entry::new("thing").unwrap());
        store.put(Coordinate::ORIGIN, Entry::new("origin").unwrap());
        store
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested").join("inventory.json");
        let file = SnapshotFile::new(&path);
        file.save(&sample_store().snapshot()).await.unwrap();
        assert!(path.exists());
        assert!(!file.temp_path.exists());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));
        let store = sample_store();
        let before = store.snapshot();

        file.save(&before).await.unwrap();
        let restored = InventoryStore::from_entries(file.load().await.unwrap());

        assert_eq!(restored.snapshot().entries, before.entries);
    }

    #[tokio::test]
    async fn interrupted_save_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));
        let store = sample_store();
        file.save(&store.snapshot()).await.unwrap();
        let old = store.snapshot().entries;

        // Stage a newer snapshot, then "crash" halfway through the bytes
        // and before the rename.
        store.put(Coordinate::new(9, 9, 9), Entry::new("new").unwrap());
        let bytes = encode(&store.snapshot()).unwrap();
        file.stage(&bytes[..bytes.len() / 2]).await.unwrap();

        let loaded = file.load().await.unwrap();
        assert_eq!(loaded, old);
    }

    #[tokio::test]
    async fn committed_save_replaces_old_contents() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));
        let store = sample_store();
        file.save(&store.snapshot()).await.unwrap();

        store.delete(Coordinate::ORIGIN);
        store.put(Coordinate::new(9, 9, 9), Entry::new("new").unwrap());
        file.save(&store.snapshot()).await.unwrap();

        assert_eq!(file.load().await.unwrap(), store.snapshot().entries);
    }

    #[tokio::test]
    async fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let bytes = encode(&sample_store().snapshot()).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let err = SnapshotFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn tampered_entries_fail_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let bytes = encode(&sample_store().snapshot()).unwrap();
        let tampered = String::from_utf8(bytes).unwrap().replace("origin", "0rigin");
        std::fs::write(&path, tampered).unwrap();

        let err = SnapshotFile::new(&path).load().await.unwrap_err();
        match err {
            StoreError::Corrupt { reason, .. } => assert_eq!(reason, "checksum mismatch"),
            other => panic!("expected corrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_coordinates_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let entries = serde_json::json!([
            {"coordinate": {"x": 1, "y": 1, "z": 1}, "entry": {"label": "a"}},
            {"coordinate": {"x": 1, "y": 1, "z": 1}, "entry": {"label": "b"}},
        ]);
        let checksum = checksum_hex(&serde_json::to_vec(&entries).unwrap());
        let doc = serde_json::json!({
            "format": SNAPSHOT_FORMAT,
            "version": SNAPSHOT_VERSION,
            "saved_at": "2026-01-01T00:00:00Z",
            "entry_count": 2,
            "checksum": checksum,
            "entries": entries,
        });
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let err = SnapshotFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn foreign_format_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, br#"{"hello": "world"}"#).unwrap();

        let err = SnapshotFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn temp_path_is_a_sibling() {
        let file = SnapshotFile::new("data/inventory.json");
        assert_eq!(file.temp_path, PathBuf::from("data/inventory.json.tmp"));
    }
}

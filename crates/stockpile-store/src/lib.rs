//! # stockpile-store
//!
//! Spatial inventory store for Stockpile.
//!
//! Items ([`Entry`]) are kept in memory, keyed by exact 3D integer
//! [`Coordinate`]s, and persisted as a single checksummed JSON snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  InventoryStore (HashMap + generation)       │
//! ├─────────────────────────────────────────────┤
//! │  Checkpointer  (idle / interval / explicit)  │
//! ├─────────────────────────────────────────────┤
//! │  SnapshotFile  (temp file + fsync + rename)  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stockpile_store::{Checkpointer, CheckpointPolicy, InventoryStore, SnapshotFile};
//!
//! let file = SnapshotFile::new("data/inventory.json");
//! let store = Arc::new(InventoryStore::from_entries(file.load().await?));
//! let checkpointer = Arc::new(Checkpointer::new(store.clone(), file, CheckpointPolicy::default()));
//! ```

pub mod checkpoint;
pub mod error;
pub mod inventory;
pub mod model;
pub mod snapshot;

// ── re-exports ───────────────────────────────────────────────────────

pub use checkpoint::{CheckpointPolicy, Checkpointer, SaveOutcome, SaveTrigger};
pub use error::{ModelError, StoreError, StoreResult};
pub use inventory::{InventoryStore, Snapshot};
pub use model::{Coordinate, Entry};
pub use snapshot::SnapshotFile;

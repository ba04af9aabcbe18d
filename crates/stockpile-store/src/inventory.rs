//! The in-memory inventory map.
//!
//! [`InventoryStore`] is the single source of truth shared by every gateway.
//! The map sits behind a `std::sync::RwLock` that is only ever held for the
//! duration of one map operation and never across an `.await`, so every
//! mutation is one indivisible step in the scheduler's execution order and
//! the last writer to a coordinate wins.
//!
//! Each mutation bumps a generation counter and publishes it on a
//! `tokio::sync::watch` channel; the checkpointer uses that as its dirty
//! signal.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::model::{Coordinate, Entry};

/// A consistent copy of every entry, taken at one logical instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The store generation these entries correspond to.
    pub generation: u64,
    /// All entries, sorted by coordinate.
    pub entries: Vec<(Coordinate, Entry)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Inner {
    map: HashMap<Coordinate, Entry>,
    generation: u64,
}

/// Coordinate-keyed inventory shared by the chat and HTTP gateways.
pub struct InventoryStore {
    inner: RwLock<Inner>,
    changes: watch::Sender<u64>,
}

impl Default for InventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::from_entries(std::iter::empty())
    }

    /// Create a store pre-filled with loaded contents.  The result is clean
    /// (generation 0), since it matches what is already on disk.
    pub fn from_entries(entries: impl IntoIterator<Item = (Coordinate, Entry)>) -> Self {
        let map: HashMap<Coordinate, Entry> = entries.into_iter().collect();
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner { map, generation: 0 }),
            changes,
        }
    }

    // A panic while the lock was held cannot leave the map half-updated (each
    // critical section is a single HashMap call), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace the entry at `coord`, returning the replaced entry.
    pub fn put(&self, coord: Coordinate, entry: Entry) -> Option<Entry> {
        let (previous, generation) = {
            let mut inner = self.write();
            let previous = inner.map.insert(coord, entry);
            inner.generation += 1;
            (previous, inner.generation)
        };
        debug!(%coord, generation, replaced = previous.is_some(), "inventory.put");
        self.changes.send_replace(generation);
        previous
    }

    /// Return a copy of the entry at `coord`, if any.
    pub fn get(&self, coord: Coordinate) -> Option<Entry> {
        self.read().map.get(&coord).cloned()
    }

    /// Remove the entry at `coord`.  Returns `false` (and leaves the store
    /// untouched) when nothing was there.
    pub fn delete(&self, coord: Coordinate) -> bool {
        self.remove(coord).is_some()
    }

    /// Like [`delete`](Self::delete), but hands back the removed entry.
    pub fn remove(&self, coord: Coordinate) -> Option<Entry> {
        let (removed, generation) = {
            let mut inner = self.write();
            let removed = inner.map.remove(&coord)?;
            inner.generation += 1;
            (removed, inner.generation)
        };
        debug!(%coord, generation, "inventory.remove");
        self.changes.send_replace(generation);
        Some(removed)
    }

    /// Take a consistent, sorted copy of the whole inventory.
    pub fn snapshot(&self) -> Snapshot {
        let (generation, mut entries) = {
            let inner = self.read();
            let entries: Vec<(Coordinate, Entry)> = inner
                .map
                .iter()
                .map(|(c, e)| (*c, e.clone()))
                .collect();
            (inner.generation, entries)
        };
        entries.sort_by_key(|(coord, _)| *coord);
        Snapshot {
            generation,
            entries,
        }
    }

    /// Number of occupied coordinates.
    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().map.is_empty()
    }

    /// Current mutation counter.
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Subscribe to mutation notifications.  The value is the generation
    /// reached by the latest mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

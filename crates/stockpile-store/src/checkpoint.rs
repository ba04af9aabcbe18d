//! Save triggers for the snapshot file.
//!
//! The [`Checkpointer`] is the only writer of the snapshot.  It holds the
//! [`SnapshotFile`] behind an async mutex, so a save that is triggered while
//! another is in flight waits for it instead of racing it.  The inventory is
//! copied only after the mutex is acquired, which keeps successive saves
//! monotonic.
//!
//! Triggers:
//! - **idle**: no mutation for [`CheckpointPolicy::idle`] after a change.
//! - **interval**: every [`CheckpointPolicy::interval`], if dirty.
//! - **explicit**: [`Checkpointer::flush`], e.g. a `save` chat command.
//! - **shutdown**: the runtime calls [`Checkpointer::save_if_dirty`] once the
//!   loop has stopped.
//!
//! A failed save is logged and leaves the store dirty, so the next trigger
//! retries it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::StoreResult;
use crate::inventory::InventoryStore;
use crate::snapshot::SnapshotFile;

/// Timing of automatic saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Quiet period after the last mutation before saving.
    pub idle: Duration,
    /// Periodic checkpoint interval.
    pub interval: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(5),
            interval: Duration::from_secs(120),
        }
    }
}

/// Why a save was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Idle,
    Interval,
    Explicit,
    Shutdown,
}

impl fmt::Display for SaveTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Interval => write!(f, "interval"),
            Self::Explicit => write!(f, "explicit"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Result of a save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The snapshot was written.
    Saved { entries: usize, generation: u64 },
    /// Nothing changed since the last successful save.
    Clean,
}

/// Owns the snapshot file and decides when to write it.
pub struct Checkpointer {
    store: Arc<InventoryStore>,
    file: Mutex<SnapshotFile>,
    policy: CheckpointPolicy,
    saved_generation: AtomicU64,
}

impl Checkpointer {
    /// Create a checkpointer for a store whose current contents already
    /// match `file` (i.e. right after loading it).
    pub fn new(store: Arc<InventoryStore>, file: SnapshotFile, policy: CheckpointPolicy) -> Self {
        let saved_generation = AtomicU64::new(store.generation());
        Self {
            store,
            file: Mutex::new(file),
            policy,
            saved_generation,
        }
    }

    pub fn policy(&self) -> CheckpointPolicy {
        self.policy
    }

    /// Whether the store has mutations that are not on disk yet.
    pub fn is_dirty(&self) -> bool {
        self.store.generation() != self.saved_generation.load(Ordering::Acquire)
    }

    /// Write the snapshot if the store changed since the last save.
    pub async fn save_if_dirty(&self, trigger: SaveTrigger) -> StoreResult<SaveOutcome> {
        self.save(trigger, false).await
    }

    /// Write the snapshot unconditionally.
    pub async fn flush(&self) -> StoreResult<SaveOutcome> {
        self.save(SaveTrigger::Explicit, true).await
    }

    async fn save(&self, trigger: SaveTrigger, force: bool) -> StoreResult<SaveOutcome> {
        let file = self.file.lock().await;
        let snapshot = self.store.snapshot();

        if !force && snapshot.generation == self.saved_generation.load(Ordering::Acquire) {
            debug!(%trigger, "store clean, skipping save");
            return Ok(SaveOutcome::Clean);
        }

        match file.save(&snapshot).await {
            Ok(()) => {
                self.saved_generation
                    .store(snapshot.generation, Ordering::Release);
                info!(
                    %trigger,
                    entries = snapshot.len(),
                    generation = snapshot.generation,
                    path = %file.path().display(),
                    "inventory saved"
                );
                Ok(SaveOutcome::Saved {
                    entries: snapshot.len(),
                    generation: snapshot.generation,
                })
            }
            Err(e) => {
                error!(
                    %trigger,
                    error = %e,
                    path = %file.path().display(),
                    "snapshot save failed, in-memory inventory remains authoritative"
                );
                Err(e)
            }
        }
    }

    /// Run the idle and interval triggers until `shutdown` flips to `true`
    /// (or its sender is dropped).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        let mut changes = self.store.subscribe();
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.policy.interval, self.policy.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Mutations made before `subscribe` are already counted as seen by
        // `changes`; arm the idle timer for them here.
        let idle = tokio::time::sleep(self.policy.idle);
        tokio::pin!(idle);
        let mut idle_armed = self.is_dirty();

        info!(
            idle_secs = self.policy.idle.as_secs_f64(),
            interval_secs = self.policy.interval.as_secs_f64(),
            "checkpointer started"
        );

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    idle.as_mut().reset(Instant::now() + self.policy.idle);
                    idle_armed = true;
                }
                () = &mut idle, if idle_armed => {
                    idle_armed = false;
                    let _ = self.save_if_dirty(SaveTrigger::Idle).await;
                }
                _ = interval.tick() => {
                    let _ = self.save_if_dirty(SaveTrigger::Interval).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("checkpointer stopped");
    }
}

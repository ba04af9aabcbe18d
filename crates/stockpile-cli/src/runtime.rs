//! Process lifecycle.
//!
//! The runtime walks through [`Phase`]s strictly in order:
//!
//! ```text
//! Starting -> Loaded -> Serving -> Draining -> Stopped
//! ```
//!
//! One `Arc<InventoryStore>` is built from the snapshot during `Loaded` and
//! handed to the HTTP server, the Discord transport and the checkpointer.
//! On Ctrl-C or SIGTERM every task is told to stop, gets a bounded grace
//! period, and the inventory is saved one last time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use stockpile_adapters::{ChatGateway, CommandGateway, DiscordGateway};
use stockpile_store::{Checkpointer, InventoryStore, SaveOutcome, SaveTrigger, SnapshotFile};
use stockpile_web::WebServer;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Config;

/// How long tasks may take to finish once shutdown has been signalled.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Starting,
    Loaded,
    Serving,
    Draining,
    Stopped,
}

impl Phase {
    fn next(self) -> Option<Self> {
        match self {
            Self::Starting => Some(Self::Loaded),
            Self::Loaded => Some(Self::Serving),
            Self::Serving => Some(Self::Draining),
            Self::Draining => Some(Self::Stopped),
            Self::Stopped => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Loaded => write!(f, "loaded"),
            Self::Serving => write!(f, "serving"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// An out-of-order phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Starting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `to`, which must be the phase directly after the current one.
    pub fn advance(&mut self, to: Phase) -> Result<(), LifecycleError> {
        if self.phase.next() != Some(to) {
            return Err(LifecycleError {
                from: self.phase,
                to,
            });
        }
        info!(from = %self.phase, to = %to, "lifecycle");
        self.phase = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

type TaskResult = (&'static str, Result<()>);

/// Run until Ctrl-C or SIGTERM.
pub async fn serve(config: Config) -> Result<()> {
    serve_until(config, shutdown_signal()).await.map(|_| ())
}

/// Run until `shutdown` resolves (or the HTTP server fails), then drain and
/// perform the final save.
pub async fn serve_until<F>(config: Config, shutdown: F) -> Result<SaveOutcome>
where
    F: Future<Output = ()>,
{
    let mut lifecycle = Lifecycle::new();

    // -- Loaded --
    let path = config.storage.snapshot_path.clone();
    let file = SnapshotFile::new(&path);
    let entries = file
        .load()
        .await
        .with_context(|| format!("cannot load snapshot {}", path.display()))?;
    let store = Arc::new(InventoryStore::from_entries(entries));
    info!(entries = store.len(), path = %path.display(), "inventory loaded");
    lifecycle.advance(Phase::Loaded)?;

    let checkpointer = Arc::new(Checkpointer::new(
        Arc::clone(&store),
        file,
        config.checkpoint_policy(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();

    // -- Serving --
    let web = WebServer::new(config.web_config(), Arc::clone(&store));
    let listener = web
        .bind()
        .await
        .with_context(|| format!("cannot bind HTTP server to {}", web.addr()))?;
    if config.http.secret_key.is_none() {
        warn!("http.secret_key is not set; anyone who can reach the server may write");
    }
    let stop = wait_for_shutdown(shutdown_rx.clone());
    tasks.spawn(async move {
        let result = web.serve(listener, stop).await.context("HTTP server failed");
        ("http", result)
    });

    match config.discord_token() {
        Some(token) => {
            let access = config.access_policy();
            if access.is_open() {
                warn!("general.owner_ids is empty; every Discord user may change the inventory");
            }
            let commands = Arc::new(
                CommandGateway::new(Arc::clone(&store), config.general.prefix.clone(), access)
                    .with_checkpointer(Arc::clone(&checkpointer)),
            );
            let discord = DiscordGateway::with_token("discord", token);
            let rx = shutdown_rx.clone();
            tasks.spawn(async move {
                let result = discord.run(commands, rx).await.map_err(anyhow::Error::from);
                ("discord", result)
            });
        }
        None => info!("no Discord token configured; chat gateway disabled"),
    }

    let background = Arc::clone(&checkpointer);
    let rx = shutdown_rx.clone();
    tasks.spawn(async move {
        background.run(rx).await;
        ("checkpointer", Ok(()))
    });
    lifecycle.advance(Phase::Serving)?;

    let mut failure: Option<anyhow::Error> = None;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            joined = tasks.join_next() => match joined {
                Some(Ok((name, Ok(())))) => info!(task = name, "task finished"),
                Some(Ok((name, Err(e)))) => {
                    error!(task = name, error = %format!("{e:#}"), "task failed");
                    if name == "http" {
                        failure = Some(e);
                        break;
                    }
                }
                Some(Err(e)) => {
                    failure = Some(anyhow!("task panicked: {e}"));
                    break;
                }
                None => break,
            },
        }
    }

    // -- Draining --
    lifecycle.advance(Phase::Draining)?;
    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(GRACE_PERIOD, async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(task = name, "task stopped"),
                Ok((name, Err(e))) => warn!(task = name, error = %format!("{e:#}"), "task failed while draining"),
                Err(e) => warn!(error = %e, "task panicked while draining"),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            grace_secs = GRACE_PERIOD.as_secs(),
            "grace period elapsed; aborting remaining tasks"
        );
        tasks.abort_all();
    }

    // -- Stopped --
    lifecycle.advance(Phase::Stopped)?;
    let outcome = checkpointer
        .save_if_dirty(SaveTrigger::Shutdown)
        .await
        .with_context(|| format!("final save to {} failed", path.display()))?;
    match outcome {
        SaveOutcome::Saved { entries, .. } => info!(entries, "final save complete"),
        SaveOutcome::Clean => info!("inventory unchanged since last save"),
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

/// Load the snapshot and print a short summary.
pub async fn check(config: &Config) -> Result<()> {
    let path = &config.storage.snapshot_path;
    let entries = SnapshotFile::new(path)
        .load()
        .await
        .with_context(|| format!("cannot load snapshot {}", path.display()))?;

    println!("snapshot:  {} ({} entries)", path.display(), entries.len());
    println!("http:      {}:{}", config.http.bind, config.http.port);
    println!(
        "secret:    {}",
        if config.http.secret_key.is_some() { "set" } else { "not set" }
    );
    println!(
        "discord:   {}",
        if config.discord_token().is_some() { "configured" } else { "disabled" }
    );
    println!("prefix:    {}", config.general.prefix);
    println!("owners:    {}", config.general.owner_ids.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_store::{Coordinate, Entry};

    #[test]
    fn lifecycle_walks_phases_in_order() {
        let mut lifecycle = Lifecycle::new();
        for phase in [
            Phase::Loaded,
            Phase::Serving,
            Phase::Draining,
            Phase::Stopped,
        ] {
            lifecycle.advance(phase).unwrap();
            assert_eq!(lifecycle.phase(), phase);
        }
    }

    #[test]
    fn lifecycle_rejects_skips_and_reversals() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.advance(Phase::Serving),
            Err(LifecycleError {
                from: Phase::Starting,
                to: Phase::Serving,
            })
        );
        lifecycle.advance(Phase::Loaded).unwrap();
        assert!(lifecycle.advance(Phase::Starting).is_err());
        assert!(lifecycle.advance(Phase::Loaded).is_err());
        assert_eq!(lifecycle.phase(), Phase::Loaded);
    }

    #[test]
    fn stopped_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        for phase in [
            Phase::Loaded,
            Phase::Serving,
            Phase::Draining,
            Phase::Stopped,
        ] {
            lifecycle.advance(phase).unwrap();
        }
        let err = lifecycle.advance(Phase::Starting).unwrap_err();
        assert_eq!(err.to_string(), "illegal lifecycle transition stopped -> starting");
    }

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.http.bind = "127.0.0.1".into();
        // Port 0 is rejected by validation but lets the OS pick for tests.
        config.http.port = 0;
        config.storage.snapshot_path = dir.path().join("inventory.json");
        config
    }

    #[tokio::test]
    async fn clean_start_and_stop_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let outcome = serve_until(config, tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Clean);
        assert!(!dir.path().join("inventory.json").exists());
    }

    #[tokio::test]
    async fn restart_keeps_existing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let store = Arc::new(InventoryStore::new());
        store.put(Coordinate::new(-100, 20, -25), Entry::new("thing").unwrap());
        Checkpointer::new(
            Arc::clone(&store),
            SnapshotFile::new(&config.storage.snapshot_path),
            config.checkpoint_policy(),
        )
        .flush()
        .await
        .unwrap();

        serve_until(config.clone(), tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();

        let entries = SnapshotFile::new(&config.storage.snapshot_path)
            .load()
            .await
            .unwrap();
        assert_eq!(
            entries,
            vec![(Coordinate::new(-100, 20, -25), Entry::new("thing").unwrap())]
        );
    }

    #[tokio::test]
    async fn corrupt_snapshot_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::write(&config.storage.snapshot_path, b"not json").unwrap();

        let err = serve_until(config, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("inventory.json"));
    }

    #[tokio::test]
    async fn check_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        assert!(check(&config).await.is_ok());

        std::fs::write(&config.storage.snapshot_path, b"{").unwrap();
        assert!(check(&config).await.is_err());
    }
}

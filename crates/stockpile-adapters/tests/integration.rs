//! Integration tests for the stockpile-adapters crate.
//!
//! These tests drive the command gateway through the [`ChatGateway`] trait
//! with a scripted in-memory transport, and check that chat changes reach
//! the snapshot on disk.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use stockpile_adapters::{
    AccessPolicy, ChatGateway, CommandGateway, CommandInvocation, CommandReply, Principal,
    ReplyStatus, Result,
};
use stockpile_store::{
    CheckpointPolicy, Checkpointer, Coordinate, Entry, InventoryStore, SnapshotFile,
};

/// A transport that replays a fixed list of messages and records replies.
struct ScriptedGateway {
    script: Vec<CommandInvocation>,
    replies: Mutex<Vec<CommandReply>>,
}

impl ScriptedGateway {
    fn new(script: &[(&str, &str)]) -> Self {
        let script = script
            .iter()
            .map(|(who, content)| CommandInvocation {
                principal: Principal::new(*who, *who),
                content: (*content).to_owned(),
            })
            .collect();
        Self {
            script,
            replies: Mutex::new(Vec::new()),
        }
    }

    fn replies(&self) -> Vec<CommandReply> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for ScriptedGateway {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        commands: Arc<CommandGateway>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        for invocation in &self.script {
            if *shutdown.borrow() {
                break;
            }
            if let Some(reply) = commands.handle(invocation).await {
                self.replies.lock().unwrap().push(reply);
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Scripted sessions
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn scripted_session_applies_commands_in_order() {
    let store = Arc::new(InventoryStore::new());
    let commands = Arc::new(CommandGateway::new(
        Arc::clone(&store),
        "!",
        AccessPolicy::restricted(["owner"]),
    ));
    let transport = ScriptedGateway::new(&[
        ("owner", "!put -100 20 -25 thing"),
        ("owner", "just chatting"),
        ("guest", "!put -100 20 -25 graffiti"),
        ("guest", "!get (-100, 20, -25)"),
        ("owner", "!set -100,20,-25 thing v2 | qty=2"),
        ("owner", "!rm 0 0 0"),
        ("guest", "!frobnicate"),
        ("owner", "!list"),
    ]);

    let (_tx, rx) = watch::channel(false);
    transport.run(Arc::clone(&commands), rx).await.unwrap();
    assert_eq!(transport.id(), "scripted");

    let statuses: Vec<ReplyStatus> = transport.replies().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReplyStatus::Ok,
            ReplyStatus::Refused,
            ReplyStatus::Ok,
            ReplyStatus::Ok,
            ReplyStatus::NotFound,
            ReplyStatus::Invalid,
            ReplyStatus::Ok,
        ]
    );

    let entry = store.get(Coordinate::new(-100, 20, -25)).unwrap();
    assert_eq!(entry.to_string(), "thing v2 [qty=2]");
    assert_eq!(store.len(), 1);

    let listing = &transport.replies()[6].content;
    assert!(listing.contains("(-100, 20, -25): thing v2 [qty=2]"));
}

#[tokio::test]
async fn stopped_transport_applies_nothing() {
    let store = Arc::new(InventoryStore::new());
    let commands = Arc::new(CommandGateway::new(
        Arc::clone(&store),
        "!",
        AccessPolicy::open(),
    ));
    let transport = ScriptedGateway::new(&[("anyone", "!put 1 1 1 late")]);

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    transport.run(commands, rx).await.unwrap();

    assert!(store.is_empty());
    assert!(transport.replies().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Persistence through chat
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_save_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");

    let store = Arc::new(InventoryStore::new());
    let checkpointer = Arc::new(Checkpointer::new(
        Arc::clone(&store),
        SnapshotFile::new(&path),
        CheckpointPolicy::default(),
    ));
    let commands = Arc::new(
        CommandGateway::new(Arc::clone(&store), "!", AccessPolicy::open())
            .with_checkpointer(checkpointer),
    );
    let transport = ScriptedGateway::new(&[
        ("steve", "!put 10 64 -3 diamond chest"),
        ("steve", "!put 0 0 0 spawn"),
        ("steve", "!delete 0 0 0"),
        ("steve", "!save"),
    ]);

    let (_tx, rx) = watch::channel(false);
    transport.run(commands, rx).await.unwrap();
    assert_eq!(transport.replies()[3].content, "Saved 1 item to disk.");

    let reloaded = InventoryStore::from_entries(SnapshotFile::new(&path).load().await.unwrap());
    assert_eq!(
        reloaded.get(Coordinate::new(10, 64, -3)),
        Some(Entry::new("diamond chest").unwrap())
    );
    assert_eq!(reloaded.get(Coordinate::ORIGIN), None);
}

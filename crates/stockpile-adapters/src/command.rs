//! Chat command gateway.
//!
//! Turns prefixed chat messages (`!put 1 2 3 chest`) into inventory
//! operations and renders the outcome as a human-readable reply.  Every
//! command is parsed and authorized in full before the store is touched, so
//! a rejected command never leaves a partial change behind.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use stockpile_store::{
    Checkpointer, Coordinate, Entry, InventoryStore, ModelError, SaveOutcome, Snapshot,
};
use tracing::{debug, error, info, warn};

use crate::error::CommandError;

/// Default command prefix.
pub const DEFAULT_PREFIX: &str = "!";

/// Longest message the chat platform accepts.
pub const MESSAGE_LIMIT: usize = 2000;

/// Room kept free in a listing for the "...and N more" tail.
const TAIL_RESERVE: usize = 40;

const PUT_USAGE: &str = "put <x> <y> <z> <label> [| key=value ...]";
const GET_USAGE: &str = "get <x> <y> <z>";
const DELETE_USAGE: &str = "delete <x> <y> <z>";

// ---------------------------------------------------------------------------
// Invocation and reply types
// ---------------------------------------------------------------------------

/// The chat user a message came from, as authenticated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable platform user id.
    pub id: String,
    /// Display name, used in logs only.
    pub name: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One incoming chat message.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub principal: Principal,
    pub content: String,
}

/// Coarse outcome of a command, for transports that want to decorate replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    NotFound,
    Invalid,
    Refused,
    Failed,
}

/// The text to send back to the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub status: ReplyStatus,
    pub content: String,
}

impl CommandReply {
    fn new(status: ReplyStatus, content: impl Into<String>) -> Self {
        Self {
            status,
            content: clip(content.into()),
        }
    }

    fn ok(content: impl Into<String>) -> Self {
        Self::new(ReplyStatus::Ok, content)
    }

    fn not_found(content: impl Into<String>) -> Self {
        Self::new(ReplyStatus::NotFound, content)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A fully parsed and validated chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Put { coordinate: Coordinate, entry: Entry },
    Get(Coordinate),
    Delete(Coordinate),
    List,
    Save,
    Help,
}

impl Command {
    /// Parse the text that follows the prefix.
    pub fn parse(body: &str) -> Result<Self, CommandError> {
        let body = body.trim();
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "put" | "set" | "store" => parse_put(args),
            "get" | "at" | "where" => parse_lone_coordinate(args, GET_USAGE).map(Self::Get),
            "delete" | "del" | "remove" | "rm" => {
                parse_lone_coordinate(args, DELETE_USAGE).map(Self::Delete)
            }
            "list" | "ls" | "inventory" => Ok(Self::List),
            "save" => Ok(Self::Save),
            "help" => Ok(Self::Help),
            other => Err(CommandError::UnknownCommand(other.to_owned())),
        }
    }

    /// Whether this command changes stored state and therefore needs
    /// authorization.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Delete(_) | Self::Save)
    }
}

fn parse_put(args: &str) -> Result<Command, CommandError> {
    if args.is_empty() {
        return Err(CommandError::Usage(PUT_USAGE));
    }
    let (coordinate, rest) = split_coordinate(args)?;

    let (label, metadata) = match rest.split_once('|') {
        Some((label, metadata)) => (label, parse_metadata(metadata)?),
        None => (rest, BTreeMap::new()),
    };
    let label = label.trim();
    if label.is_empty() {
        return Err(CommandError::Usage(PUT_USAGE));
    }

    let entry = Entry::with_metadata(label, metadata)?;
    Ok(Command::Put { coordinate, entry })
}

fn parse_metadata(text: &str) -> Result<BTreeMap<String, String>, CommandError> {
    let mut metadata = BTreeMap::new();
    for token in text.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            return Err(ModelError::InvalidMetadata {
                key: token.to_owned(),
                reason: "expected key=value".to_owned(),
            }
            .into());
        };
        metadata.insert(key.to_owned(), value.to_owned());
    }
    Ok(metadata)
}

fn parse_lone_coordinate(args: &str, usage: &'static str) -> Result<Coordinate, CommandError> {
    if args.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    let (coordinate, rest) = split_coordinate(args)?;
    if !rest.trim().is_empty() {
        return Err(CommandError::Usage(usage));
    }
    Ok(coordinate)
}

fn is_separator(c: char) -> bool {
    c == ',' || c.is_whitespace()
}

/// Split a leading coordinate off `args`.  Accepts `x y z`, `x,y,z` and
/// `(x, y, z)`; returns the coordinate and whatever follows it.
fn split_coordinate(args: &str) -> Result<(Coordinate, &str), CommandError> {
    let args = args.trim_start();

    if let Some(inner) = args.strip_prefix('(') {
        let Some(end) = inner.find(')') else {
            return Err(CommandError::UnclosedParen);
        };
        let coordinate = inner[..end].parse::<Coordinate>()?;
        return Ok((coordinate, &inner[end + 1..]));
    }

    let mut parts = Vec::with_capacity(3);
    let mut rest = args;
    while parts.len() < 3 {
        rest = rest.trim_start_matches(is_separator);
        if rest.is_empty() {
            break;
        }
        let end = rest.find(is_separator).unwrap_or(rest.len());
        parts.push(&rest[..end]);
        rest = &rest[end..];
    }

    match parts.as_slice() {
        [x, y, z] => Ok((Coordinate::from_parts(x, y, z)?, rest)),
        other => Err(ModelError::CoordinateArity(other.len()).into()),
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// Which principals may run mutating commands.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    mutators: HashSet<String>,
}

impl AccessPolicy {
    /// Anyone may mutate.
    pub fn open() -> Self {
        Self::default()
    }

    /// Only the listed principal ids may mutate.  An empty list is the same
    /// as [`AccessPolicy::open`].
    pub fn restricted<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mutators: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.mutators.is_empty()
    }

    pub fn may_mutate(&self, principal: &Principal) -> bool {
        self.is_open() || self.mutators.contains(&principal.id)
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Applies chat commands to the shared inventory.
pub struct CommandGateway {
    store: Arc<InventoryStore>,
    checkpointer: Option<Arc<Checkpointer>>,
    prefix: String,
    access: AccessPolicy,
}

impl CommandGateway {
    pub fn new(store: Arc<InventoryStore>, prefix: impl Into<String>, access: AccessPolicy) -> Self {
        Self {
            store,
            checkpointer: None,
            prefix: prefix.into(),
            access,
        }
    }

    /// Enable the `save` command.
    pub fn with_checkpointer(mut self, checkpointer: Arc<Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn access(&self) -> &AccessPolicy {
        &self.access
    }

    /// Handle one chat message.  Returns `None` when the message is not a
    /// command at all (no prefix), in which case nothing should be sent.
    pub async fn handle(&self, invocation: &CommandInvocation) -> Option<CommandReply> {
        let body = invocation
            .content
            .trim_start()
            .strip_prefix(self.prefix.as_str())?;
        if body.is_empty() || body.starts_with(char::is_whitespace) {
            return None;
        }

        let principal = &invocation.principal;
        let reply = match Command::parse(body) {
            Ok(command) => match self.execute(principal, command).await {
                Ok(reply) => reply,
                Err(err) => self.reply_for_error(principal, err),
            },
            Err(err) => self.reply_for_error(principal, err),
        };
        Some(reply)
    }

    /// Authorize and run an already parsed command.
    pub async fn execute(
        &self,
        principal: &Principal,
        command: Command,
    ) -> Result<CommandReply, CommandError> {
        if command.is_mutating() && !self.access.may_mutate(principal) {
            return Err(CommandError::Unauthorized);
        }

        let reply = match command {
            Command::Put { coordinate, entry } => {
                let message = format!("{entry}");
                match self.store.put(coordinate, entry) {
                    Some(previous) => {
                        info!(principal = %principal.id, %coordinate, "chat: replaced entry");
                        CommandReply::ok(format!(
                            "Replaced {previous} at {coordinate} with {message}."
                        ))
                    }
                    None => {
                        info!(principal = %principal.id, %coordinate, "chat: stored entry");
                        CommandReply::ok(format!("Stored {message} at {coordinate}."))
                    }
                }
            }
            Command::Get(coordinate) => match self.store.get(coordinate) {
                Some(entry) => CommandReply::ok(format!("{coordinate}: {entry}")),
                None => CommandReply::not_found(format!("Nothing is stored at {coordinate}.")),
            },
            Command::Delete(coordinate) => match self.store.remove(coordinate) {
                Some(removed) => {
                    info!(principal = %principal.id, %coordinate, "chat: removed entry");
                    CommandReply::ok(format!("Removed {removed} from {coordinate}."))
                }
                None => CommandReply::not_found(format!("Nothing to remove at {coordinate}.")),
            },
            Command::List => CommandReply::ok(format_listing(&self.store.snapshot())),
            Command::Save => self.save(principal).await?,
            Command::Help => CommandReply::ok(self.help_text()),
        };
        Ok(reply)
    }

    async fn save(&self, principal: &Principal) -> Result<CommandReply, CommandError> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or(CommandError::SaveUnavailable)?;

        info!(principal = %principal.id, "chat: save requested");
        match checkpointer.flush().await {
            Ok(SaveOutcome::Saved { entries, .. }) => Ok(CommandReply::ok(format!(
                "Saved {entries} item{} to disk.",
                plural(entries)
            ))),
            Ok(SaveOutcome::Clean) => Ok(CommandReply::ok("Nothing new to save.")),
            Err(err) => {
                error!(error = %err, "chat: save failed");
                Ok(CommandReply::new(
                    ReplyStatus::Failed,
                    "Saving failed; the inventory is still held in memory. Check the logs.",
                ))
            }
        }
    }

    fn reply_for_error(&self, principal: &Principal, err: CommandError) -> CommandReply {
        match err {
            CommandError::Unauthorized => {
                warn!(principal = %principal.id, name = %principal.name, "chat: refused mutation");
                CommandReply::new(
                    ReplyStatus::Refused,
                    "Sorry, you are not allowed to change the inventory.",
                )
            }
            CommandError::SaveUnavailable => {
                CommandReply::new(ReplyStatus::Failed, "Saving is not available right now.")
            }
            CommandError::Usage(usage) => CommandReply::new(
                ReplyStatus::Invalid,
                format!("Usage: `{}{usage}`", self.prefix),
            ),
            other => {
                debug!(principal = %principal.id, error = %other, "chat: invalid command");
                CommandReply::new(
                    ReplyStatus::Invalid,
                    format!("Sorry, {other}. Try `{}help`.", self.prefix),
                )
            }
        }
    }

    fn help_text(&self) -> String {
        let p = &self.prefix;
        format!(
            "**Stockpile commands**\n\
             `{p}put <x> <y> <z> <label> [| key=value ...]` store an item\n\
             `{p}get <x> <y> <z>` show what is stored at a location\n\
             `{p}delete <x> <y> <z>` remove an item\n\
             `{p}list` show the whole inventory\n\
             `{p}save` write the inventory to disk now\n\
             `{p}help` show this message\n\
             Coordinates may also be written `x,y,z` or `(x, y, z)`."
        )
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Render a listing that fits in one chat message.
fn format_listing(snapshot: &Snapshot) -> String {
    if snapshot.is_empty() {
        return "The inventory is empty.".to_owned();
    }

    let total = snapshot.len();
    let mut out = format!("Inventory ({total} item{}):", plural(total));
    for (i, (coordinate, entry)) in snapshot.entries.iter().enumerate() {
        let line = format!("\n{coordinate}: {entry}");
        let budget = if i + 1 == total {
            MESSAGE_LIMIT
        } else {
            MESSAGE_LIMIT - TAIL_RESERVE
        };
        if out.len() + line.len() > budget {
            let _ = write!(out, "\n...and {} more", total - i);
            return out;
        }
        out.push_str(&line);
    }
    out
}

/// Cut `text` down to [`MESSAGE_LIMIT`] bytes on a char boundary.
fn clip(mut text: String) -> String {
    if text.len() <= MESSAGE_LIMIT {
        return text;
    }
    let mut end = MESSAGE_LIMIT - 3;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("...");
    text
}

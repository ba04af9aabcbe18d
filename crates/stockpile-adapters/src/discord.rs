//! Discord transport for Stockpile.
//!
//! Keeps a websocket session to the Discord gateway (v10, JSON encoding),
//! feeds every `MESSAGE_CREATE` to the [`CommandGateway`] in arrival order,
//! and answers through the REST API.  Replies are sent from spawned tasks so
//! a slow REST call never holds up the next command.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::command::{CommandGateway, CommandInvocation, Principal};
use crate::error::{AdapterError, Result};
use crate::traits::ChatGateway;

/// Discord API v10 base URL.
const API_BASE_URL: &str = "https://discord.com/api/v10";

/// Discord gateway endpoint.
const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Gateway opcodes we act on.
mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Close codes after which reconnecting cannot help (bad token, intents).
const FATAL_CLOSE_CODES: [u16; 5] = [4004, 4010, 4011, 4013, 4014];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
    author: Author,
}

impl MessageCreate {
    fn into_invocation(self) -> CommandInvocation {
        let name = self
            .author
            .global_name
            .unwrap_or_else(|| self.author.username.clone());
        CommandInvocation {
            principal: Principal::new(self.author.id, name),
            content: self.content,
        }
    }
}

/// How a gateway session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Shutdown was requested.
    Shutdown,
    /// The connection dropped or Discord asked us to reconnect.
    Reconnect,
    /// Discord refused the session for good.
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Discord bot transport.
///
/// Authentication uses a bot token, normally supplied through
/// `DISCORD_BOT_TOKEN` or the `general.token` configuration key.
pub struct DiscordGateway {
    /// Unique identifier for this transport instance.
    id: String,
    /// Discord bot token for authentication.
    bot_token: Option<String>,
    /// HTTP client for REST replies.
    http: reqwest::Client,
}

impl DiscordGateway {
    /// Create a transport with no token; [`ChatGateway::run`] will refuse to
    /// start until one is configured.
    pub fn new(id: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("Stockpile/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            id: id.into(),
            bot_token: None,
            http,
        }
    }

    /// Create a transport with a pre-configured bot token.
    pub fn with_token(id: impl Into<String>, bot_token: impl Into<String>) -> Self {
        let mut gateway = Self::new(id);
        gateway.bot_token = Some(bot_token.into());
        gateway
    }

    /// Resolve the bot token, returning an error if none is available.
    fn resolve_token(&self) -> Result<String> {
        self.bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AdapterError::AuthRequired {
                adapter_id: self.id.clone(),
                provider: "discord".to_string(),
            })
    }

    /// Build a full API URL from a path segment.
    fn api_url(path: &str) -> String {
        format!("{}{}", API_BASE_URL, path)
    }

    // -----------------------------------------------------------------------
    // Payload builders
    // -----------------------------------------------------------------------

    fn identify_payload(token: &str) -> Value {
        json!({
            "op": op::IDENTIFY,
            "d": {
                "token": token,
                "intents": INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "stockpile",
                    "device": "stockpile",
                },
            },
        })
    }

    fn heartbeat_payload(sequence: Option<u64>) -> Value {
        json!({ "op": op::HEARTBEAT, "d": sequence })
    }

    /// Body for a reply to `message_id`; pings are suppressed.
    fn reply_body(message_id: &str, content: &str) -> Value {
        json!({
            "content": content,
            "message_reference": {
                "message_id": message_id,
                "fail_if_not_exists": false,
            },
            "allowed_mentions": { "parse": [] },
        })
    }

    // -----------------------------------------------------------------------
    // REST
    // -----------------------------------------------------------------------

    async fn send_reply(
        http: reqwest::Client,
        token: String,
        channel_id: String,
        body: Value,
    ) -> Result<()> {
        let url = Self::api_url(&format!("/channels/{channel_id}/messages"));
        let response = http
            .post(&url)
            .header("Authorization", format!("Bot {token}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::RequestFailed {
                operation: "create_message".into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::RequestFailed {
                operation: "create_message".into(),
                reason: format!("Discord API error (status {status}): {text}"),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Gateway session
    // -----------------------------------------------------------------------

    /// Run one websocket session from connect to disconnect.
    async fn session(
        &self,
        token: &str,
        commands: &Arc<CommandGateway>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(GATEWAY_URL))
            .await
            .map_err(|_| AdapterError::Timeout {
                seconds: CONNECT_TIMEOUT.as_secs(),
                reason: "connecting to the Discord gateway".into(),
            })?
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();
        debug!("discord: websocket connected");

        // The first frame must be HELLO with the heartbeat interval.
        let hello = match tokio::time::timeout(CONNECT_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<GatewayPayload>(&text)?,
            Ok(Some(Ok(other))) => {
                return Err(AdapterError::Protocol(format!(
                    "expected HELLO, got {other:?}"
                )));
            }
            Ok(Some(Err(e))) => return Err(AdapterError::Connection(e.to_string())),
            Ok(None) => return Ok(SessionEnd::Reconnect),
            Err(_) => {
                return Err(AdapterError::Timeout {
                    seconds: CONNECT_TIMEOUT.as_secs(),
                    reason: "waiting for HELLO".into(),
                });
            }
        };
        let interval = heartbeat_interval(&hello)?;

        sink.send(Message::text(Self::identify_payload(token).to_string()))
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence: Option<u64> = None;
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        warn!("discord: heartbeat not acknowledged, reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    }
                    sink.send(Message::text(Self::heartbeat_payload(sequence).to_string()))
                        .await
                        .map_err(|e| AdapterError::Connection(e.to_string()))?;
                    awaiting_ack = true;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Reconnect);
                    };
                    let frame = frame.map_err(|e| AdapterError::Connection(e.to_string()))?;
                    let payload = match frame {
                        Message::Text(text) => serde_json::from_str::<GatewayPayload>(&text)?,
                        Message::Close(close) => {
                            let code = close.as_ref().map(|c| u16::from(c.code));
                            if let Some(code) = code.filter(|c| FATAL_CLOSE_CODES.contains(c)) {
                                let reason = close
                                    .map(|c| c.reason.as_str().to_owned())
                                    .unwrap_or_default();
                                return Ok(SessionEnd::Rejected(format!(
                                    "gateway closed with {code}: {reason}"
                                )));
                            }
                            info!(?code, "discord: gateway closed the connection");
                            return Ok(SessionEnd::Reconnect);
                        }
                        _ => continue,
                    };

                    if payload.s.is_some() {
                        sequence = payload.s;
                    }
                    match payload.op {
                        op::DISPATCH => self.dispatch(payload, token, commands).await,
                        op::HEARTBEAT => {
                            sink.send(Message::text(Self::heartbeat_payload(sequence).to_string()))
                                .await
                                .map_err(|e| AdapterError::Connection(e.to_string()))?;
                        }
                        op::HEARTBEAT_ACK => awaiting_ack = false,
                        op::RECONNECT => {
                            info!("discord: gateway requested reconnect");
                            let frame = CloseFrame {
                                code: CloseCode::Restart,
                                reason: "reconnect".into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            return Ok(SessionEnd::Reconnect);
                        }
                        op::INVALID_SESSION => {
                            warn!("discord: session invalidated");
                            return Ok(SessionEnd::Reconnect);
                        }
                        other => debug!(op = other, "discord: ignoring opcode"),
                    }
                }
            }
        }
    }

    /// Handle a dispatch event.  Commands run inline so they reach the store
    /// in the order Discord delivered them.
    async fn dispatch(&self, payload: GatewayPayload, token: &str, commands: &Arc<CommandGateway>) {
        match payload.t.as_deref() {
            Some("READY") => {
                let user = payload.d["user"]["username"].as_str().unwrap_or("unknown");
                info!(user, "discord: session ready");
            }
            Some("MESSAGE_CREATE") => {
                let message: MessageCreate = match serde_json::from_value(payload.d) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "discord: malformed MESSAGE_CREATE");
                        return;
                    }
                };
                if message.author.bot {
                    return;
                }

                let message_id = message.id.clone();
                let channel_id = message.channel_id.clone();
                let invocation = message.into_invocation();
                let Some(reply) = commands.handle(&invocation).await else {
                    return;
                };
                debug!(status = ?reply.status, channel = %channel_id, "discord: replying");

                let body = Self::reply_body(&message_id, &reply.content);
                let http = self.http.clone();
                let token = token.to_owned();
                tokio::spawn(async move {
                    if let Err(e) = Self::send_reply(http, token, channel_id, body).await {
                        warn!(error = %e, "discord: failed to send reply");
                    }
                });
            }
            _ => {}
        }
    }
}

fn heartbeat_interval(hello: &GatewayPayload) -> Result<Duration> {
    if hello.op != op::HELLO {
        return Err(AdapterError::Protocol(format!(
            "expected HELLO (op {}), got op {}",
            op::HELLO,
            hello.op
        )));
    }
    hello.d["heartbeat_interval"]
        .as_u64()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .ok_or_else(|| AdapterError::Protocol("HELLO without heartbeat_interval".into()))
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        commands: Arc<CommandGateway>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let token = self.resolve_token()?;
        // Fails harmlessly if a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut backoff = MIN_BACKOFF;
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.session(&token, &commands, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Rejected(reason)) => return Err(AdapterError::Protocol(reason)),
                Ok(SessionEnd::Reconnect) => backoff = MIN_BACKOFF,
                Err(e) => warn!(error = %e, retry_in_secs = backoff.as_secs(), "discord: session failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        info!(id = %self.id, "discord: transport stopped");
        Ok(())
    }
}

//! Adapter error types.
//!
//! Transport failures surface through [`AdapterError`].  Problems with a
//! user's command are not errors at this level: they become
//! [`CommandError`]s, which the command gateway turns into replies.

use stockpile_store::ModelError;

/// Unified error type for Stockpile chat transports.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The adapter requires authentication that has not been configured.
    #[error("authentication required for adapter `{adapter_id}`: provider={provider}")]
    AuthRequired {
        adapter_id: String,
        provider: String,
    },

    /// A websocket connection or frame failed.
    #[error("gateway connection error: {0}")]
    Connection(String),

    /// The remote side sent something we cannot follow.
    #[error("gateway protocol error: {0}")]
    Protocol(String),

    /// A REST call to the chat platform failed.
    #[error("request `{operation}` failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An operation exceeded its time limit.
    #[error("timeout after {seconds}s: {reason}")]
    Timeout { seconds: u64, reason: String },
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Why a chat command could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Invalid(#[from] ModelError),

    #[error("missing `)` after the coordinate")]
    UnclosedParen,

    #[error("you are not allowed to change the inventory")]
    Unauthorized,

    #[error("saving is not available")]
    SaveUnavailable,
}

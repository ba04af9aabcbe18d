//! Core chat gateway trait.
//!
//! A chat platform transport implements [`ChatGateway`]: it owns the
//! connection to the platform, turns incoming messages into
//! [`CommandInvocation`](crate::command::CommandInvocation)s for the shared
//! [`CommandGateway`], and delivers the replies.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::CommandGateway;
use crate::error::Result;

/// The universal chat transport interface.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Return the unique identifier for this transport instance.
    fn id(&self) -> &str;

    /// Serve chat traffic until `shutdown` becomes `true`.
    ///
    /// Transient connection failures are handled inside (reconnect with
    /// backoff); an `Err` means the transport cannot run at all.
    async fn run(
        &self,
        commands: Arc<CommandGateway>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;
}

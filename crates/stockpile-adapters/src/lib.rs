//! Chat front ends for Stockpile.
//!
//! [`CommandGateway`] turns chat commands into inventory operations; a
//! [`ChatGateway`] implementation (currently [`DiscordGateway`]) carries
//! messages between the chat platform and the command gateway.

pub mod command;
pub mod discord;
pub mod error;
pub mod traits;

pub use command::{
    AccessPolicy, Command, CommandGateway, CommandInvocation, CommandReply, DEFAULT_PREFIX,
    MESSAGE_LIMIT, Principal, ReplyStatus,
};
pub use discord::DiscordGateway;
pub use error::{AdapterError, CommandError, Result};
pub use traits::ChatGateway;

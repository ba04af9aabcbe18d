//! HTTP gateway for Stockpile.
//!
//! This crate exposes the shared inventory over a small JSON API:
//!
//! - `POST /post` stores an entry at a coordinate.
//! - `GET /get` looks up one coordinate, or lists everything when no
//!   coordinate is given.
//! - `OPTIONS` on both routes answers CORS preflights.
//! - `GET /` returns a version banner.
//!
//! Every response carries permissive CORS headers.

use std::time::Duration;

pub mod api;
pub mod server;
pub mod state;

pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// When set, `POST /post` requires this value in the `Authorization`
    /// header.
    pub secret_key: Option<String>,
    /// Upper bound on the time spent handling one request.
    pub request_timeout: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            secret_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

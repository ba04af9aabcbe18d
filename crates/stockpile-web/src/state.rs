//! Shared application state for the web server.

use std::sync::Arc;

use stockpile_store::InventoryStore;

use crate::WebConfig;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The inventory, shared with the chat gateway.
    pub store: Arc<InventoryStore>,

    /// Web server configuration.
    pub config: WebConfig,
}

//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and runs the
//! HTTP listener until its shutdown future resolves.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::routing::{get, post};
use stockpile_store::InventoryStore;
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::WebConfig;
use crate::api;
use crate::state::AppState;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// The Stockpile HTTP gateway.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server over the shared inventory.
    pub fn new(config: WebConfig, store: Arc<InventoryStore>) -> Self {
        let state = Arc::new(AppState {
            store,
            config: config.clone(),
        });
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes and layers registered.
    pub fn router(&self) -> Router {
        // The CORS headers are set on every response, errors included, with
        // exactly these values.
        let allow_origin =
            SetResponseHeaderLayer::overriding(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        let allow_methods = SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET,POST,OPTIONS"),
        );
        let allow_headers = SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );

        Router::new()
            .route("/", get(api::banner))
            .route("/post", post(api::post_entry).options(api::preflight))
            .route("/get", get(api::get_entries).options(api::preflight))
            .fallback(api::not_found)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                self.config.request_timeout,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(allow_origin)
            .layer(allow_methods)
            .layer(allow_headers)
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.addr()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// stop accepting and let in-flight requests finish.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "starting web server");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("web server stopped");
        Ok(())
    }

    /// Bind and serve in one step.
    pub async fn start<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

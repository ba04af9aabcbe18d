//! REST API route handlers.
//!
//! Handlers validate the whole request before calling the store, so a
//! rejected or timed-out request never leaves a partial change.  Once
//! `put` has run the change stands, even if the response never reaches the
//! client.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use stockpile_store::{Coordinate, Entry};

use crate::state::AppState;

/// Body returned for every `OPTIONS` request.
pub const OPTIONS_BODY: &str = "Options received";

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

pub async fn banner() -> String {
    format!("stockpile v{}", env!("CARGO_PKG_VERSION"))
}

// ---------------------------------------------------------------------------
// POST /post
// ---------------------------------------------------------------------------

/// Request body for `POST /post`.
#[derive(Debug, Deserialize)]
pub struct PostBody {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    #[serde(alias = "item")]
    pub label: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Store an entry, replacing whatever was at the coordinate.
pub async fn post_entry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<PostBody>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    if !authorized(state.config.secret_key.as_deref(), &headers) {
        tracing::warn!("rejected POST /post without a valid secret key");
        return error(StatusCode::UNAUTHORIZED, "missing or invalid secret key");
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return error(rejection.status(), rejection.body_text()),
    };
    let entry = match Entry::with_metadata(body.label, body.metadata) {
        Ok(entry) => entry,
        Err(e) => return error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };
    let coordinate = Coordinate::new(body.x, body.y, body.z);

    let replaced = state.store.put(coordinate, entry.clone()).is_some();
    tracing::info!(%coordinate, replaced, "http: stored entry");

    (
        StatusCode::OK,
        Json(json!({
            "coordinate": coordinate,
            "entry": entry,
            "replaced": replaced,
        })),
    )
}

/// Check the `Authorization` header against the configured secret.  A
/// `Bearer ` prefix is accepted.  No secret means everyone is allowed.
pub fn authorized(secret: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let presented = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    presented == secret
}

// ---------------------------------------------------------------------------
// GET /get
// ---------------------------------------------------------------------------

/// Query string for `GET /get`.  Kept as text so a bad number produces our
/// own error message rather than a generic rejection.
#[derive(Debug, Default, Deserialize)]
pub struct GetQuery {
    pub x: Option<String>,
    pub y: Option<String>,
    pub z: Option<String>,
}

/// Look up one coordinate, or list the whole inventory when no coordinate
/// is given.
pub async fn get_entries(
    State(state): State<Arc<AppState>>,
    query: Result<Query<GetQuery>, QueryRejection>,
) -> (StatusCode, Json<Value>) {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error(rejection.status(), rejection.body_text()),
    };

    match (query.x, query.y, query.z) {
        (None, None, None) => {
            let snapshot = state.store.snapshot();
            let entries: Vec<Value> = snapshot
                .entries
                .iter()
                .map(|(coordinate, entry)| json!({ "coordinate": coordinate, "entry": entry }))
                .collect();
            (
                StatusCode::OK,
                Json(json!({ "count": entries.len(), "entries": entries })),
            )
        }
        (Some(x), Some(y), Some(z)) => {
            let coordinate = match Coordinate::from_parts(&x, &y, &z) {
                Ok(coordinate) => coordinate,
                Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
            };
            match state.store.get(coordinate) {
                Some(entry) => (
                    StatusCode::OK,
                    Json(json!({ "coordinate": coordinate, "entry": entry })),
                ),
                None => (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": "not found", "coordinate": coordinate })),
                ),
            }
        }
        _ => error(
            StatusCode::BAD_REQUEST,
            "x, y and z must be given together (or not at all)",
        ),
    }
}

// ---------------------------------------------------------------------------
// OPTIONS /post, OPTIONS /get
// ---------------------------------------------------------------------------

/// CORS preflight.  Never reads the body and never touches the store.
pub async fn preflight() -> &'static str {
    OPTIONS_BODY
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

pub async fn not_found() -> (StatusCode, Json<Value>) {
    error(StatusCode::NOT_FOUND, "no such route")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn no_secret_allows_everyone() {
        assert!(authorized(None, &HeaderMap::new()));
        assert!(authorized(None, &with_auth("anything")));
    }

    #[test]
    fn secret_must_match_with_or_without_bearer() {
        assert!(authorized(Some("s3cret"), &with_auth("s3cret")));
        assert!(authorized(Some("s3cret"), &with_auth("Bearer s3cret")));
        assert!(!authorized(Some("s3cret"), &with_auth("Bearer nope")));
        assert!(!authorized(Some("s3cret"), &HeaderMap::new()));
    }

    #[test]
    fn post_body_accepts_item_alias() {
        let body: PostBody =
            serde_json::from_str(r#"{"x":-100,"y":20,"z":-25,"item":"thing"}"#).unwrap();
        assert_eq!(body.label, "thing");
        assert!(body.metadata.is_empty());
    }

    #[tokio::test]
    async fn banner_names_version() {
        assert!(banner().await.starts_with("stockpile v"));
    }
}

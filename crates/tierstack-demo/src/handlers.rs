//! Request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{error, info};

use crate::AppState;
use crate::error::StoreError;

const INVALID: &str = "Invalid!";

fn internal(e: StoreError) -> Response {
    error!(error = %e, "post store failure");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// GET /
pub async fn hello() -> &'static str {
    "Hello World"
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /posts
pub async fn list_posts(State(state): State<AppState>) -> Response {
    match state.store.list() {
        Ok(posts) => Json(posts).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /posts
///
/// The body is parsed by hand so every malformed request gets the same
/// `400 Invalid!` answer.
pub async fn create_post(State(state): State<AppState>, body: Bytes) -> Response {
    let title = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("title").and_then(Value::as_str).map(str::to_string))
        .filter(|title| !title.trim().is_empty());
    let Some(title) = title else {
        return (StatusCode::BAD_REQUEST, INVALID).into_response();
    };

    match state.store.create(&title) {
        Ok(post) => {
            info!(id = post.id, "post created");
            (StatusCode::CREATED, Json(post)).into_response()
        }
        Err(e) => internal(e),
    }
}

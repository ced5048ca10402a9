//! HTTP surface: the admission guard middleware and the sidecar endpoints.

mod guard;
mod server;
mod service;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub use guard::{
    caller_key, client_addr, guard, protect, CallerIdentity, GuardState, RateLimitRejection,
};
pub use server::HttpServer;
pub use service::{AdmitRequest, AdmitResponse, AppState, LimitSummary, Limiters};

/// Largest request body the guard and sidecar will buffer.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Plain `{ "error": ... }` response.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

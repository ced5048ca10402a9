//! Admission guard middleware for protected routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Extensions, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;
use tracing::{info, trace, warn};

use super::{error_response, MAX_BODY_BYTES};
use crate::error::RateLimited;
use crate::ratelimit::{AdmissionBackend, CallerKey, LimitPolicy};

/// Authenticated caller id, inserted into request extensions by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// State shared by every request passing through one guard.
#[derive(Clone)]
pub struct GuardState {
    /// Backend deciding admission
    pub limiter: Arc<dyn AdmissionBackend>,
    /// Take the caller address from `X-Forwarded-For`
    pub trust_forwarded_for: bool,
}

impl GuardState {
    pub fn new(limiter: Arc<dyn AdmissionBackend>, trust_forwarded_for: bool) -> Self {
        Self {
            limiter,
            trust_forwarded_for,
        }
    }
}

/// Wrap every route of `router` in an admission guard.
pub fn protect<S>(router: Router<S>, state: GuardState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(from_fn_with_state(state, guard))
}

/// Middleware: derive the caller key, ask the limiter, and either forward the
/// request or answer 429.
pub async fn guard(State(state): State<GuardState>, request: Request, next: Next) -> Response {
    let (request, key) = match caller_key(request, state.trust_forwarded_for).await {
        Ok(derived) => derived,
        Err(response) => return response,
    };

    match state.limiter.admit(&key).await {
        Ok(()) => {
            trace!(key = %key, policy = %state.limiter.policy().name, "Request admitted");
            next.run(request).await
        }
        Err(rejected) => {
            info!(
                key = %key,
                policy = %state.limiter.policy().name,
                retry_after_secs = rejected.retry_after_secs,
                "Request rate limited"
            );
            RateLimitRejection::new(state.limiter.policy(), rejected).into_response()
        }
    }
}

/// Derive the limiter key for `request`, handing the request back intact.
///
/// The body is only buffered when no authenticated identity is present, the
/// content type is JSON, and the body is known to fit in `MAX_BODY_BYTES`, so
/// the `username` field can be consulted. Any other body is forwarded
/// untouched and the caller is keyed by address.
pub async fn caller_key(
    request: Request,
    trust_forwarded_for: bool,
) -> Result<(Request, CallerKey), Response> {
    let remote = client_addr(request.headers(), request.extensions(), trust_forwarded_for);

    let identity = request
        .extensions()
        .get::<CallerIdentity>()
        .map(|id| id.0.clone())
        .filter(|id| !id.trim().is_empty());
    if let Some(id) = identity {
        let key = CallerKey::derive(Some(id.as_str()), None, remote.as_deref());
        return Ok((request, key));
    }

    if !is_json(request.headers()) || !fits_peek_limit(request.body()) {
        let key = CallerKey::derive(None, None, remote.as_deref());
        return Ok((request, key));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to buffer request body");
            error_response(StatusCode::BAD_REQUEST, "Invalid request body")
        })?;

    let username = username_from_body(&bytes);
    let key = CallerKey::derive(None, username.as_deref(), remote.as_deref());
    Ok((Request::from_parts(parts, Body::from(bytes)), key))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn fits_peek_limit(body: &Body) -> bool {
    matches!(body.size_hint().upper(), Some(len) if len <= MAX_BODY_BYTES as u64)
}

/// The caller's network address as a string, if one is known.
pub fn client_addr(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_forwarded_for: bool,
) -> Option<String> {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return Some(addr.to_string());
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn username_from_body(bytes: &Bytes) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.get("username")?.as_str().map(str::to_owned)
}

/// A 429 response shaped by the rejecting policy.
#[derive(Debug, Clone)]
pub struct RateLimitRejection {
    body: Value,
    retry_after_secs: u64,
    advertise_retry_after: bool,
}

impl RateLimitRejection {
    pub fn new(policy: &LimitPolicy, rejected: RateLimited) -> Self {
        Self {
            body: policy.rejection_body(rejected.retry_after_secs),
            retry_after_secs: rejected.retry_after_secs,
            advertise_retry_after: policy.advertise_retry_after,
        }
    }
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self.body)).into_response();
        if self.advertise_retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        }
        response
    }
}

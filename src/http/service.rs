//! Admission sidecar endpoints.
//!
//! The web backend can ask this service for a decision instead of embedding
//! the guard: `POST /v1/admit/{policy}` answers 200 when the caller may
//! proceed and 429 (with the policy's payload) when it may not.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::guard::{client_addr, RateLimitRejection};
use super::{error_response, MAX_BODY_BYTES};
use crate::ratelimit::{AdmissionBackend, CallerKey};

/// The two limiters the service runs.
#[derive(Clone)]
pub struct Limiters {
    /// Lesson-color preference writes
    pub colors: Arc<dyn AdmissionBackend>,
    /// Upstream timetable-provider calls
    pub timetable: Arc<dyn AdmissionBackend>,
}

impl Limiters {
    /// Look a limiter up by its policy name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn AdmissionBackend>> {
        self.all().into_iter().find(|l| l.policy().name == name)
    }

    /// Every limiter, colors first.
    pub fn all(&self) -> [&Arc<dyn AdmissionBackend>; 2] {
        [&self.colors, &self.timetable]
    }
}

/// Shared state for the sidecar handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiters: Limiters,
    pub trust_forwarded_for: bool,
}

/// Key material for one admission decision.
#[derive(Debug, Default, Deserialize)]
pub struct AdmitRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Defaults to the connecting peer when absent
    #[serde(default)]
    pub remote_addr: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdmitResponse {
    pub admitted: bool,
    pub key: String,
    pub policy: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LimitSummary {
    pub name: String,
    pub window_ms: u64,
    pub max_per_window: usize,
    pub tracked_keys: usize,
}

/// `POST /v1/admit/{policy}`
#[instrument(skip_all, fields(policy = %policy))]
pub(crate) async fn admit(
    State(state): State<AppState>,
    Path(policy): Path<String>,
    request: Request,
) -> Response {
    let Some(limiter) = state.limiters.by_name(&policy) else {
        warn!("Admission requested for unknown policy");
        return error_response(StatusCode::NOT_FOUND, format!("unknown policy '{}'", policy));
    };

    let peer = client_addr(
        request.headers(),
        request.extensions(),
        state.trust_forwarded_for,
    );

    let bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read admission request body");
            return error_response(StatusCode::BAD_REQUEST, "Invalid request body");
        }
    };

    let body: AdmitRequest = if bytes.is_empty() {
        AdmitRequest::default()
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "Malformed admission request");
                return error_response(StatusCode::BAD_REQUEST, "Malformed admission request");
            }
        }
    };

    let remote = body.remote_addr.or(peer);
    let key = CallerKey::derive(
        body.user_id.as_deref(),
        body.username.as_deref(),
        remote.as_deref(),
    );

    match limiter.admit(&key).await {
        Ok(()) => {
            debug!(key = %key, "Admitted");
            Json(AdmitResponse {
                admitted: true,
                key: key.as_key(),
                policy: limiter.policy().name.clone(),
            })
            .into_response()
        }
        Err(rejected) => {
            info!(
                key = %key,
                retry_after_secs = rejected.retry_after_secs,
                "Rate limited"
            );
            RateLimitRejection::new(limiter.policy(), rejected).into_response()
        }
    }
}

/// `GET /v1/limits`
pub(crate) async fn list_limits(State(state): State<AppState>) -> Json<Vec<LimitSummary>> {
    let summaries = state
        .limiters
        .all()
        .into_iter()
        .map(|limiter| {
            let policy = limiter.policy();
            LimitSummary {
                name: policy.name.clone(),
                window_ms: policy.window_ms,
                max_per_window: policy.max_per_window,
                tracked_keys: limiter.tracked_keys(),
            }
        })
        .collect();
    Json(summaries)
}

/// `GET /healthz`
pub(crate) async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpServer;
    use crate::ratelimit::{LimitPolicy, ManualClock, SlidingWindowLimiter};
    use axum::body::Body;
    use axum::http::header;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        let clock = Arc::new(ManualClock::new(0));
        let limiters = Limiters {
            colors: Arc::new(
                SlidingWindowLimiter::with_clock(LimitPolicy::lesson_colors(), clock.clone())
                    .unwrap(),
            ),
            timetable: Arc::new(
                SlidingWindowLimiter::with_clock(LimitPolicy::timetable_upstream(), clock)
                    .unwrap(),
            ),
        };
        HttpServer::new("127.0.0.1:0".parse().unwrap(), limiters, false)
    }

    fn admit_request(policy: &str, body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(format!("/v1/admit/{}", policy))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admit_then_rate_limit() {
        let router = server().router();
        let body = r#"{"user_id":"42","remote_addr":"1.2.3.4"}"#;

        for _ in 0..6 {
            let response = router
                .clone()
                .oneshot(admit_request("timetable", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let admitted: AdmitResponse = json_body(response).await;
            assert!(admitted.admitted);
            assert_eq!(admitted.key, "user:42");
            assert_eq!(admitted.policy, "timetable");
        }

        let response = router
            .clone()
            .oneshot(admit_request("timetable", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
        let rejected: serde_json::Value = json_body(response).await;
        assert_eq!(rejected["retryAfter"], 5);

        // The color limiter is untouched
        let response = router
            .oneshot(admit_request("colors", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_key_derivation_from_body() {
        let router = server().router();

        let response = router
            .clone()
            .oneshot(admit_request("colors", r#"{"username":"alice","remote_addr":"1.2.3.4"}"#))
            .await
            .unwrap();
        let admitted: AdmitResponse = json_body(response).await;
        assert_eq!(admitted.key, "username:alice");

        let response = router
            .oneshot(admit_request("colors", r#"{"remote_addr":"1.2.3.4"}"#))
            .await
            .unwrap();
        let admitted: AdmitResponse = json_body(response).await;
        assert_eq!(admitted.key, "ip:1.2.3.4");
    }

    #[tokio::test]
    async fn test_unknown_policy_is_not_found() {
        let response = server()
            .router()
            .oneshot(admit_request("exports", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let response = server()
            .router()
            .oneshot(admit_request("colors", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_limits_reports_tracked_keys() {
        let router = server().router();
        router
            .clone()
            .oneshot(admit_request("timetable", r#"{"user_id":"1"}"#))
            .await
            .unwrap();

        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/limits")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let limits: Vec<LimitSummary> = json_body(response).await;
        assert_eq!(limits.len(), 2);
        assert_eq!(limits[0].name, "colors");
        assert_eq!(limits[0].tracked_keys, 0);
        assert_eq!(limits[1].name, "timetable");
        assert_eq!(limits[1].max_per_window, 6);
        assert_eq!(limits[1].tracked_keys, 1);
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = server()
            .router()
            .oneshot(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! HTTP server for the admission service.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::service::{self, AppState, Limiters};
use crate::error::Result;

/// HTTP server exposing the admission endpoints.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Limiters and request handling settings
    state: AppState,
}

impl HttpServer {
    /// Create a new server over the given limiters.
    pub fn new(addr: SocketAddr, limiters: Limiters, trust_forwarded_for: bool) -> Self {
        Self {
            addr,
            state: AppState {
                limiters,
                trust_forwarded_for,
            },
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(service::healthz))
            .route("/v1/limits", get(service::list_limits))
            .route("/v1/admit/{policy}", post(service::admit))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_listener(listener, signal).await
    }

    /// Serve on an already-bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP admission service with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

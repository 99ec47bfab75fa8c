//! Relay HTTP server.

use axum::{
    http::HeaderName,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::models::ServerConfig;
use crate::services::dispatcher::Dispatcher;

use super::handlers;

/// Shared state for the relay HTTP server.
pub struct RelayState {
    pub dispatcher: Dispatcher,
    pub config: ServerConfig,
}

/// Relay HTTP server.
pub struct RelayHttpServer {
    state: Arc<RelayState>,
}

impl RelayHttpServer {
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(RelayState { dispatcher, config }),
        }
    }

    /// Build the router with all endpoints.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/api/chat", post(handlers::chat))
            .route("/api/metrics", get(handlers::metrics))
            .route("/api/metrics/reset", post(handlers::reset_metrics))
            .route("/api/health", get(handlers::health))
            .route("/api/sessions/{id}", delete(handlers::forget_session))
            .route("/api/admin/reset", post(handlers::admin_reset))
            .fallback(handlers::not_found)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.state.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
                    .expose_headers([HeaderName::from_static(handlers::SESSION_HEADER)]),
            );
        }

        router
    }

    fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.state.config.host, self.state.config.port).parse()
    }

    /// Start the server.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with a shutdown signal.
    pub async fn serve_with_shutdown<F>(
        self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.addr()?;
        let router = self.router();

        tracing::info!("Relay HTTP server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

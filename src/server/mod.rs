//! HTTP server

pub mod auth;
pub mod routes;
pub mod state;

use axum::{middleware, routing::get, routing::post, Router};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use state::AppState;

/// The ingestion/retrieval HTTP server
pub struct Server {
    config: AppConfig,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Assemble the router around an existing state (used by tests).
    pub fn router(state: AppState) -> Router {
        let api = routes::api_routes(state.config().server.max_upload_size)
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_api_key,
            ));

        let mut router = Router::new()
            // Probes and the internal callback live outside /api and are
            // exempt from the API key.
            .route("/health", get(health))
            .route("/live", get(health))
            .route("/ready", get(readiness))
            .route("/internal/callback", post(routes::callback::worker_callback))
            .nest("/api", api)
            .with_state(state.clone())
            .layer(TraceLayer::new_for_http());

        if state.config().server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router
    }

    /// Bind and serve until ctrl-c; shuts the workers down on the way out.
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {}", e)))?;

        let router = Self::router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {}", addr, e)))?;

        tracing::info!("listening on http://{}", addr);

        let state = self.state.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
                state.shutdown();
            })
            .await
            .map_err(|e| Error::Internal(format!("server error: {}", e)))?;

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn readiness(state: axum::extract::State<AppState>) -> axum::http::StatusCode {
    if state.is_ready() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }
}

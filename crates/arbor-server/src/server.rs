//! `ArborServer` — Axum HTTP server assembly.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use arbor_runtime::abort::{AbortRegistry, InMemoryAbortSource};
use arbor_runtime::engine::Collaborators;

use crate::config::ServerConfig;
use crate::routes;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaborator wiring for generation runs.
    pub collaborators: Collaborators,
    /// Cancellation snapshot consulted by running pipelines.
    pub abort: Arc<AbortRegistry>,
    /// Authoritative abort store the abort endpoint writes to.
    pub abort_source: Arc<InMemoryAbortSource>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Arbor HTTP server.
pub struct ArborServer {
    config: ServerConfig,
    state: AppState,
}

impl ArborServer {
    /// Assemble a server from its configuration and collaborators.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        collaborators: Collaborators,
        abort: Arc<AbortRegistry>,
        abort_source: Arc<InMemoryAbortSource>,
    ) -> Self {
        let state = AppState {
            collaborators,
            abort,
            abort_source,
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// Build the Axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health::health))
            .route("/conversations/generate", post(routes::generate::generate))
            .route("/conversations/{id}/abort", post(routes::abort::abort))
            .layer(DefaultBodyLimit::max(self.config.body_limit_bytes))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

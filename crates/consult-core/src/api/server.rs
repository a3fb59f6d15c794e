//! HTTP API server.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::orchestrator::SessionOrchestrator;
use crate::types::OrchestratorError;

use super::routes::{
    change_role, configure_session, create_session, join_session, leave_session, new_case,
    skip_phase, start_session, submit_feedback,
};
use super::types::{ErrorResponse, HealthResponse};
use super::ws_handler::subscribe;

pub type SharedOrchestrator = Arc<SessionOrchestrator>;

/// HTTP/WebSocket API server wrapping a [`SessionOrchestrator`].
pub struct HttpApiServer {
    config: ApiConfig,
    orchestrator: SharedOrchestrator,
    start_time: Instant,
}

impl HttpApiServer {
    pub fn new(config: ApiConfig, orchestrator: SharedOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
            start_time: Instant::now(),
        }
    }

    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Fatal(format!("failed to bind to {addr}: {e}")))?;

        tracing::info!(addr = %addr, "http api server starting");

        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Fatal(format!("server error: {e}")))?;

        Ok(())
    }

    fn create_router(&self) -> Router {
        let session_router = Router::new()
            .route("/sessions", post(create_session))
            .route("/sessions/:code/join", post(join_session))
            .route("/sessions/:code/configure", post(configure_session))
            .route("/sessions/:code/start", post(start_session))
            .route("/sessions/:code/skip", post(skip_phase))
            .route("/sessions/:code/leave", post(leave_session))
            .route("/sessions/:code/new-case", post(new_case))
            .route("/sessions/:code/change-role", post(change_role))
            .route("/feedback/submit", post(submit_feedback))
            .route("/ws", get(subscribe))
            .with_state(self.orchestrator.clone());

        let mut router = Router::new()
            .route("/health", get(health_check))
            .with_state(self.start_time)
            .merge(session_router)
            .layer(TraceLayer::new_for_http());

        if !self.config.cors_origins.is_empty() {
            let origins: Vec<HeaderValue> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(origins)
                    .allow_methods([Method::GET, Method::POST])
                    .allow_headers([header::CONTENT_TYPE])
                    .allow_credentials(false),
            );
        }

        router
    }
}

async fn health_check(
    axum::extract::State(start_time): axum::extract::State<Instant>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

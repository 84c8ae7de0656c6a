/// HTTP API for account self-registration
///
/// - `POST /api/v1/accounts/register`: run a registration; the body is a
///   `RegistrationResponse` and the status reflects its error kind
/// - `GET /health`: liveness
/// - `GET /metrics`: Prometheus text exposition
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::RegistrationError;
use crate::metrics;
use crate::models::{RegistrationRequest, RegistrationResponse};
use crate::registration::RegistrationCoordinator;

/// Shared HTTP server state
#[derive(Clone)]
pub struct HttpServerState {
    pub coordinator: Arc<RegistrationCoordinator>,
    /// Cancelled on shutdown; in-flight publishes stop retrying
    pub shutdown: CancellationToken,
}

pub fn build_router(state: HttpServerState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/accounts/register", post(register))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn register(
    State(state): State<HttpServerState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(reason = %rejection.body_text(), "Malformed registration request");
            let err = RegistrationError::Validation("Request body is not valid.".to_string());
            return (err.kind().status_code(), Json(RegistrationResponse::failed(&err)))
                .into_response();
        }
    };

    let cancel = state.shutdown.child_token();
    let response = state.coordinator.register_user(request, &cancel).await;

    let status = response
        .error_kind
        .map(|kind| kind.status_code())
        .unwrap_or(StatusCode::OK);
    (status, Json(response)).into_response()
}

/// Serve until `shutdown` is cancelled
pub async fn start_http_server(
    state: HttpServerState,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting HTTP API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}

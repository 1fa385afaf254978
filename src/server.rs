//! HTTP control surface.
//!
//! A thin axum adapter over [`Ingestor`]: start a run, poll its status,
//! read the patent count.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Start a run (202), or 409 if one is in flight |
//! | `GET`  | `/ingest/status` | Current [`IngestionStatus`] |
//! | `GET`  | `/patents/count` | Rows in `patents_main` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "internal", "message": "..." } }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::ingestor::{IngestionStatus, Ingestor, StartOutcome};

#[derive(Clone)]
struct AppState {
    ingestor: Arc<Ingestor>,
}

/// Build the router. Exposed separately so tests can serve it on an
/// ephemeral port.
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_start))
        .route("/ingest/status", get(handle_status))
        .route("/patents/count", get(handle_count))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { ingestor })
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config, ingestor: Arc<Ingestor>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "control server listening");
    println!("Patent ingest server listening on http://{}", bind_addr);

    axum::serve(listener, router(ingestor)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct StartResponse {
    status: &'static str,
}

async fn handle_start(State(state): State<AppState>) -> (StatusCode, Json<StartResponse>) {
    match state.ingestor.start() {
        StartOutcome::Started => (
            StatusCode::ACCEPTED,
            Json(StartResponse { status: "started" }),
        ),
        StartOutcome::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(StartResponse {
                status: "already_running",
            }),
        ),
    }
}

async fn handle_status(State(state): State<AppState>) -> Json<IngestionStatus> {
    Json(state.ingestor.status())
}

#[derive(Serialize)]
struct CountResponse {
    count: i64,
}

async fn handle_count(State(state): State<AppState>) -> Result<Json<CountResponse>, AppError> {
    let count = state.ingestor.patent_count().await.map_err(internal)?;
    Ok(Json(CountResponse { count }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

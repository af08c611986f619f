//! HTTP endpoints.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/history` | Ruuvi Gateway compatible snapshot of active tags |
//! | GET | `/metrics` | Prometheus exposition |
//!
//! Any other path answers 404.

use crate::clock::Clock;
use crate::output::SnapshotEncoder;
use crate::output::exposition::render_prometheus;
use crate::snapshot::{HistoryData, SnapshotBuilder};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::Registry;
use std::sync::Arc;

const INTERNAL_ERROR_BODY: &str = "Internal server error";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub snapshots: SnapshotBuilder,
    pub encoder: Arc<dyn SnapshotEncoder>,
    pub metrics: Registry,
    pub clock: Arc<dyn Clock>,
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/history", get(history_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(state))
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain")],
        INTERNAL_ERROR_BODY,
    )
        .into_response()
}

async fn history_handler(State(state): State<Arc<AppState>>) -> Response {
    let history = HistoryData {
        data: state.snapshots.build_snapshot(state.clock.now()),
    };

    match state.encoder.encode(&history) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.encoder.content_type())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "history encoding failed");
            internal_error()
        }
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match render_prometheus(&state.metrics) {
        Ok(exposition) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, exposition.content_type)],
            exposition.body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "metrics encoding failed");
            internal_error()
        }
    }
}

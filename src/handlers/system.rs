// src/handlers/system.rs

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::config::AppState;

pub async fn health() -> &'static str {
    "OK"
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

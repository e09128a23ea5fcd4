// src/lib.rs

use std::time::Duration;

use axum::{
    Router,
    error_handling::HandleErrorLayer,
    extract::Request,
    middleware as axum_middleware,
    routing::{get, post},
};
use tower::{ServiceBuilder, timeout::TimeoutLayer};
use tower_http::{
    catch_panic::CatchPanicLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod common;
pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod telemetry;

use crate::config::AppState;
use crate::handlers::items::{self, SERVICE_PREFIX};

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The six StoreService RPCs, one POST route each.
fn rpc_routes() -> Router<AppState> {
    Router::new()
        .route("/CreateItem", post(items::create_item))
        .route("/GetItem", post(items::get_item))
        .route("/UpdateItem", post(items::update_item))
        .route("/DeleteItem", post(items::delete_item))
        .route("/ListItems", post(items::list_items))
        .route("/UpdateInventory", post(items::update_inventory))
}

/// Full application router, shared by the binary and the integration tests.
///
/// Layers, outermost first: request span, RPC metrics, panic recovery,
/// request deadline, canary tag. Deadline and panic failures answer with
/// the same error body as the handlers.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handlers::system::health))
        .route("/metrics", get(handlers::system::metrics))
        .nest(SERVICE_PREFIX, rpc_routes())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", docs::ApiDoc::openapi()))
        .layer(axum_middleware::from_fn(middleware::canary_tag))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(common::error::handle_layer_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(CatchPanicLayer::custom(common::error::panic_response))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rpc_metrics,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "request",
                        service = SERVICE_NAME,
                        version = SERVICE_VERSION,
                        method = %request.method(),
                        path = %request.uri().path(),
                        canary = tracing::field::Empty,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

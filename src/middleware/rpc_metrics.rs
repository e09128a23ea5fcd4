// src/middleware/rpc_metrics.rs

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::common::error::RpcStatus;
use crate::config::AppState;
use crate::handlers::items::SERVICE_PREFIX;
use crate::telemetry::MetricsSink;

/// Status recorded for calls whose future was dropped before a response.
const CANCELLED: &str = "CANCELLED";
const OK: &str = "OK";
const UNKNOWN: &str = "UNKNOWN";

const RPC_METHODS: [&str; 6] = [
    "CreateItem",
    "GetItem",
    "UpdateItem",
    "DeleteItem",
    "ListItems",
    "UpdateInventory",
];

/// Splits `/store.v1.StoreService/GetItem` into service and method. Only
/// the six served methods are recognised.
pub fn rpc_name(path: &str) -> Option<(&'static str, &'static str)> {
    let method = path.strip_prefix(SERVICE_PREFIX)?.strip_prefix('/')?;
    let method = RPC_METHODS.into_iter().find(|known| *known == method)?;
    Some((SERVICE_PREFIX.trim_start_matches('/'), method))
}

/// Status label for a finished call: the RPC code of an error body, `OK`
/// for a success, `UNKNOWN` for anything else.
fn status_code(response: &Response) -> &'static str {
    match response.extensions().get::<RpcStatus>() {
        Some(RpcStatus(code)) => *code,
        None if response.status().is_success() => OK,
        None => UNKNOWN,
    }
}

/// Holds a call in the in-flight gauge until it finishes or is dropped.
struct InFlight {
    metrics: Arc<dyn MetricsSink>,
    service: &'static str,
    method: &'static str,
    started: Instant,
    status: Option<&'static str>,
}

impl InFlight {
    fn start(metrics: Arc<dyn MetricsSink>, service: &'static str, method: &'static str) -> Self {
        metrics.rpc_started();
        Self {
            metrics,
            service,
            method,
            started: Instant::now(),
            status: None,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let status = self.status.unwrap_or(CANCELLED);
        self.metrics
            .rpc_finished(self.service, self.method, status, self.started.elapsed());
    }
}

/// Per-call counter, latency and in-flight gauge for the StoreService
/// routes. Other paths pass through unrecorded.
pub async fn rpc_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some((service, method)) = rpc_name(req.uri().path()) else {
        return next.run(req).await;
    };

    let mut call = InFlight::start(state.metrics.clone(), service, method);
    let response = next.run(req).await;
    call.status = Some(status_code(&response));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse};

    use crate::common::error::AppError;

    #[test]
    fn rpc_paths_split_into_service_and_method() {
        assert_eq!(
            rpc_name("/store.v1.StoreService/UpdateInventory"),
            Some(("store.v1.StoreService", "UpdateInventory"))
        );
        assert_eq!(rpc_name("/store.v1.StoreService/Bogus"), None);
        assert_eq!(rpc_name("/store.v1.StoreService"), None);
        assert_eq!(rpc_name("/health"), None);
    }

    #[test]
    fn status_comes_from_the_error_body() {
        let invalid = AppError::InvalidArgument("bad".into()).into_response();
        assert_eq!(status_code(&invalid), "INVALID_ARGUMENT");

        assert_eq!(status_code(&StatusCode::OK.into_response()), "OK");
        assert_eq!(status_code(&StatusCode::METHOD_NOT_ALLOWED.into_response()), "UNKNOWN");
    }
}

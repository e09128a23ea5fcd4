// src/common/error.rs

use std::any::Any;
use std::collections::HashMap;

use axum::{
    BoxError, Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::TableError;

// ---
// Store errors
// ---
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item {item_id} not found for tenant {tenant_id}")]
    ItemNotFound { tenant_id: i64, item_id: String },

    #[error("{0}")]
    InvalidInput(String),

    /// Nothing was written; `previous_count` is the stock at the time of the
    /// attempt.
    #[error("insufficient inventory: have {previous_count}, change {quantity_change}")]
    InsufficientInventory {
        previous_count: i32,
        quantity_change: i32,
    },

    /// Conditional writes kept failing against concurrent writers although
    /// the change itself fits. Nothing was written; safe to retry.
    #[error("item {item_id} for tenant {tenant_id} is under contention, gave up after {attempts} attempts")]
    Contention {
        tenant_id: i64,
        item_id: String,
        attempts: u32,
    },

    #[error("{operation} failed for tenant {tenant_id} item {item_id}: {source}")]
    Infrastructure {
        operation: &'static str,
        tenant_id: i64,
        item_id: String,
        #[source]
        source: TableError,
    },
}

// ---
// Handler boundary errors
// ---
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Failures outside the store (middleware errors, panics). The message
    /// is logged, never returned.
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

/// RPC status codes carried in the error body.
pub mod status {
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const FAILED_PRECONDITION: &str = "FAILED_PRECONDITION";
    pub const ABORTED: &str = "ABORTED";
    pub const DEADLINE_EXCEEDED: &str = "DEADLINE_EXCEEDED";
    pub const INTERNAL: &str = "INTERNAL";
}

/// Status code of an error response, left in the response extensions for
/// the request metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcStatus(pub &'static str);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (http_status, code, message, details) = match self {
            AppError::Validation(errors) => {
                let mut details = HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors
                        .iter()
                        .map(|e| {
                            e.message
                                .as_ref()
                                .map(|m| m.to_string())
                                .unwrap_or_else(|| e.code.to_string())
                        })
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                (
                    StatusCode::BAD_REQUEST,
                    status::INVALID_ARGUMENT,
                    "one or more fields are invalid".to_string(),
                    Some(json!(details)),
                )
            }
            AppError::InvalidArgument(message) => (
                StatusCode::BAD_REQUEST,
                status::INVALID_ARGUMENT,
                message,
                None,
            ),
            AppError::Store(StoreError::InvalidInput(message)) => (
                StatusCode::BAD_REQUEST,
                status::INVALID_ARGUMENT,
                message,
                None,
            ),
            AppError::Store(err @ StoreError::ItemNotFound { .. }) => (
                StatusCode::NOT_FOUND,
                status::NOT_FOUND,
                err.to_string(),
                None,
            ),
            AppError::Store(StoreError::InsufficientInventory {
                previous_count,
                quantity_change,
            }) => (
                StatusCode::BAD_REQUEST,
                status::FAILED_PRECONDITION,
                format!(
                    "insufficient inventory: current count {previous_count}, requested change {quantity_change}"
                ),
                Some(json!({
                    "previousCount": previous_count,
                    "quantityChange": quantity_change,
                })),
            ),
            AppError::Store(err @ StoreError::Contention { .. }) => (
                StatusCode::CONFLICT,
                status::ABORTED,
                err.to_string(),
                None,
            ),
            AppError::Store(err @ StoreError::Infrastructure { .. }) => {
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    status::INTERNAL,
                    "an internal error occurred".to_string(),
                    None,
                )
            }
            AppError::DeadlineExceeded => {
                tracing::warn!("request deadline exceeded");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    status::DEADLINE_EXCEEDED,
                    "request deadline exceeded".to_string(),
                    None,
                )
            }
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    status::INTERNAL,
                    "an internal error occurred".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "code": code,
            "message": message,
        });
        if let Some(details) = details {
            body["details"] = details;
        }

        let mut response = (http_status, Json(body)).into_response();
        response.extensions_mut().insert(RpcStatus(code));
        response
    }
}

// ---
// Middleware failures
// ---

/// Turns errors of the tower layers (the request deadline) into RPC
/// error bodies.
pub async fn handle_layer_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::DeadlineExceeded
    } else {
        AppError::Internal(format!("unhandled middleware error: {err}"))
    }
}

/// Response for a handler that panicked.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else {
        "unknown panic payload"
    };
    AppError::Internal(format!("handler panicked: {detail}")).into_response()
}

// src/common/extract.rs

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::common::error::AppError;

/// `Json` whose rejections surface as `INVALID_ARGUMENT` in the RPC error
/// body instead of axum's plain-text rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcJson<T>(pub T);

impl<S, T> FromRequest<S> for RpcJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(RpcJson(value)),
            Err(rejection) => Err(AppError::InvalidArgument(rejection_message(&rejection))),
        }
    }
}

impl<T: Serialize> IntoResponse for RpcJson<T> {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "expected request with `Content-Type: application/json`".to_string()
        }
        other => other.body_text(),
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::generation::GenerationError;
use crate::store::StoreError;
use crate::TokenpipeError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<TokenpipeError> for ApiError {
    fn from(e: TokenpipeError) -> Self {
        Self {
            status: e.to_status_code(),
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        TokenpipeError::from(e).into()
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        TokenpipeError::from(e).into()
    }
}

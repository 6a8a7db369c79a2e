//! Error types for codechat-gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::provider::ProviderError;

/// Gateway request errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request rejected before any backend call or state change
    #[error("{0}")]
    Validation(String),

    /// Generation backend failed or was unreachable
    #[error("{0}")]
    Backend(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Common(#[from] codechat_common::Error),
}

/// Machine-readable error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Common(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Short summary for the `error` field.
    fn summary(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Invalid request",
            Self::Backend(_) => "Failed to get response from model",
            Self::NotFound(_) => "Not found",
            Self::Common(e) if e.is_not_found() => "Not found",
            Self::Common(_) => "Internal error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.summary().to_string(),
            details: self.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.body())).into_response()
    }
}

//! エラー型定義 (tsp-api)
//!
//! Every failure leaves the API as
//! `{"error": {"kind", "code", "message"}, "state"?}` with a stable kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use tsp_core::{ErrorKind, ProvisionError, ProvisioningState, StoreError};

/// tsp-api のエラー型
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing or invalid API key")]
    Unauthorized,
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ProvisioningState>,
}

/// HTTP status for a provisioning error
fn provision_status(err: &ProvisionError) -> StatusCode {
    match err {
        ProvisionError::InvalidIdentity(_) | ProvisionError::InvalidPhoneNumber => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ProvisionError::InvalidInput(_)
        | ProvisionError::InvalidCode { .. }
        | ProvisionError::InvalidPassword { .. } => StatusCode::BAD_REQUEST,
        ProvisionError::AlreadyInProgress { .. } | ProvisionError::WrongStep { .. } => {
            StatusCode::CONFLICT
        }
        ProvisionError::UnknownRequest(_) => StatusCode::NOT_FOUND,
        ProvisionError::RequestClosed { .. } => StatusCode::GONE,
        ProvisionError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ProvisionError::ProviderRejected { .. } => StatusCode::BAD_GATEWAY,
        ProvisionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, ErrorBody) {
        let (status, kind, code, message, state) = match self {
            ApiError::Provision(e) => {
                let kind = e.kind();
                let message = if kind == ErrorKind::Internal {
                    "internal error".to_string()
                } else {
                    e.to_string()
                };
                (provision_status(e), kind, e.code(), message, e.state())
            }
            ApiError::Store(StoreError::NotFound(identity)) => (
                StatusCode::NOT_FOUND,
                ErrorKind::NotFound,
                "CredentialNotFound",
                format!("no credential stored for {}", identity),
                None,
            ),
            ApiError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                "StoreError",
                "internal error".to_string(),
                None,
            ),
            ApiError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorKind::InvalidInput,
                "InvalidRequest",
                msg.clone(),
                None,
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorKind::NotFound,
                "NotFound",
                msg.clone(),
                None,
            ),
            ApiError::Unauthorized => {
                return (
                    StatusCode::UNAUTHORIZED,
                    ErrorBody {
                        error: ErrorDetail {
                            kind: "unauthorized",
                            code: "Unauthorized",
                            message: self.to_string(),
                        },
                        state: None,
                    },
                );
            }
        };

        (
            status,
            ErrorBody {
                error: ErrorDetail {
                    kind: kind.as_str(),
                    code,
                    message,
                },
                state,
            },
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        if status.is_server_error() {
            error!("API error ({}): {}", status, self);
        }
        (status, Json(body)).into_response()
    }
}

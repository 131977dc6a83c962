//! Error types for tsp-telegram

use teloxide::dispatching::dialogue::InMemStorageError;
use thiserror::Error;

use tsp_core::ProvisioningState;

/// tsp-telegram error type
#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram token not set")]
    TokenNotSet,

    /// Structured error answered by the provisioning API
    #[error("{message}")]
    Api {
        status: u16,
        kind: String,
        code: String,
        message: String,
        state: Option<ProvisioningState>,
    },

    #[error("Provisioning API unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Teloxide error: {0}")]
    Teloxide(#[from] teloxide::ApiError),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Dialogue storage error: {0}")]
    Dialogue(#[from] InMemStorageError),
}

impl From<teloxide::RequestError> for TelegramError {
    fn from(err: teloxide::RequestError) -> Self {
        match err {
            teloxide::RequestError::Api(api_err) => TelegramError::Teloxide(api_err),
            _ => TelegramError::Request(err.to_string()),
        }
    }
}

impl TelegramError {
    /// Stable error code from the API, if this is an API answer
    pub fn api_code(&self) -> Option<&str> {
        match self {
            TelegramError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TelegramError>;

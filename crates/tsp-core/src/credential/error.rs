//! Credential store errors

use thiserror::Error;

use crate::credential::cipher::CryptoError;
use crate::types::UserIdentity;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No credential stored for {0}")]
    NotFound(UserIdentity),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Corrupt credential record: {0}")]
    Corrupt(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

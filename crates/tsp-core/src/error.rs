//! Error types for tsp-core

use thiserror::Error;

use crate::credential::{CryptoError, StoreError};

/// Main error type for tsp-core setup and wiring
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Result type alias for tsp-core
pub type Result<T> = std::result::Result<T, Error>;

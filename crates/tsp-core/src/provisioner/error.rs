//! Provisioning errors

use serde::Serialize;
use thiserror::Error;

use super::state::ProvisioningState;
use crate::credential::StoreError;
use crate::types::{RequestId, ValidationError};

/// Stable error categories exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Conflict,
    NotFound,
    ProviderTransient,
    ProviderPermanent,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::ProviderTransient => "provider_transient",
            Self::ProviderPermanent => "provider_permanent",
            Self::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    InvalidIdentity(ValidationError),

    #[error("invalid phone number: use international format, e.g. +1234567890")]
    InvalidPhoneNumber,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a provisioning request is already in progress for this identity ({request_id})")]
    AlreadyInProgress { request_id: RequestId },

    #[error("unknown or expired request {0}")]
    UnknownRequest(RequestId),

    #[error("invalid code, {attempts_remaining} attempt(s) remaining")]
    InvalidCode {
        attempts_remaining: u32,
        state: ProvisioningState,
    },

    #[error("invalid password, {attempts_remaining} attempt(s) remaining")]
    InvalidPassword {
        attempts_remaining: u32,
        state: ProvisioningState,
    },

    #[error("request is closed ({state})")]
    RequestClosed { state: ProvisioningState },

    #[error("request is in state {state}, this step is not expected now")]
    WrongStep { state: ProvisioningState },

    #[error("Telegram is temporarily unavailable, try again later")]
    ProviderUnavailable { state: Option<ProvisioningState> },

    #[error("{message}")]
    ProviderRejected {
        message: String,
        state: Option<ProvisioningState>,
    },

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
}

pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentity(_)
            | Self::InvalidPhoneNumber
            | Self::InvalidInput(_)
            | Self::InvalidCode { .. }
            | Self::InvalidPassword { .. } => ErrorKind::InvalidInput,
            Self::AlreadyInProgress { .. } | Self::RequestClosed { .. } | Self::WrongStep { .. } => {
                ErrorKind::Conflict
            }
            Self::UnknownRequest(_) => ErrorKind::NotFound,
            Self::ProviderUnavailable { .. } => ErrorKind::ProviderTransient,
            Self::ProviderRejected { .. } => ErrorKind::ProviderPermanent,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Variant name, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentity(_) => "InvalidIdentity",
            Self::InvalidPhoneNumber => "InvalidPhoneNumber",
            Self::InvalidInput(_) => "InvalidInput",
            Self::AlreadyInProgress { .. } => "AlreadyInProgress",
            Self::UnknownRequest(_) => "UnknownRequest",
            Self::InvalidCode { .. } => "InvalidCode",
            Self::InvalidPassword { .. } => "InvalidPassword",
            Self::RequestClosed { .. } => "RequestClosed",
            Self::WrongStep { .. } => "WrongStep",
            Self::ProviderUnavailable { .. } => "ProviderUnavailable",
            Self::ProviderRejected { .. } => "ProviderRejected",
            Self::Store(_) => "StoreError",
        }
    }

    /// Request state after the failed call, when a request is involved
    pub fn state(&self) -> Option<ProvisioningState> {
        match self {
            Self::InvalidCode { state, .. }
            | Self::InvalidPassword { state, .. }
            | Self::RequestClosed { state }
            | Self::WrongStep { state } => Some(*state),
            Self::ProviderUnavailable { state } | Self::ProviderRejected { state, .. } => *state,
            _ => None,
        }
    }
}

impl From<ValidationError> for ProvisionError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidPhoneNumber => Self::InvalidPhoneNumber,
            other => Self::InvalidIdentity(other),
        }
    }
}

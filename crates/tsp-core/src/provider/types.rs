//! Auth provider contract
//!
//! An [`AuthProvider`] starts a login for a phone number and hands back an
//! [`AuthHandshake`] that carries the rest of the flow (code, then an
//! optional two-factor password).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::credential::AccountInfo;
use crate::types::PhoneNumber;

/// What the protocol asks for next
#[derive(Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    /// A login code was sent to the account's devices
    CodeSent,
    /// The account has two-factor auth enabled
    PasswordRequired { hint: Option<String> },
    /// Signed in; the session can be persisted
    Authorized {
        session_blob: Zeroizing<Vec<u8>>,
        account: Option<AccountInfo>,
    },
}

impl fmt::Debug for AuthChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CodeSent => f.write_str("CodeSent"),
            Self::PasswordRequired { hint } => f
                .debug_struct("PasswordRequired")
                .field("hint", hint)
                .finish(),
            Self::Authorized {
                session_blob,
                account,
            } => f
                .debug_struct("Authorized")
                .field("session_blob", &format_args!("<{} bytes>", session_blob.len()))
                .field("account", account)
                .finish(),
        }
    }
}

/// Errors reported by the external auth protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("phone number rejected by Telegram")]
    PhoneNumberInvalid,

    #[error("login code rejected")]
    InvalidCode,

    #[error("two-factor password rejected")]
    InvalidPassword,

    #[error("login code expired")]
    CodeExpired,

    #[error("phone number is not registered with Telegram")]
    SignUpRequired,

    /// Rate limiting, timeouts, dropped connections
    #[error("temporarily unavailable: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("rejected: {0}")]
    Rejected(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Server-requested wait before the next attempt (`FLOOD_WAIT_n`)
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Transient and not asking us to wait longer than `max_wait`
    pub fn is_retryable_within(&self, max_wait: Duration) -> bool {
        self.is_transient() && self.retry_after().is_none_or(|wait| wait <= max_wait)
    }

    /// Classify a Telegram RPC error by its code and name.
    ///
    /// `value` is the numeric suffix Telegram appends to some names, e.g. the
    /// seconds in `FLOOD_WAIT_30`.
    pub fn from_rpc(code: i32, name: &str, value: Option<u32>) -> Self {
        match name {
            "PHONE_NUMBER_INVALID" => Self::PhoneNumberInvalid,
            "PHONE_CODE_INVALID" | "PHONE_CODE_EMPTY" => Self::InvalidCode,
            "PHONE_CODE_EXPIRED" => Self::CodeExpired,
            "PASSWORD_HASH_INVALID" => Self::InvalidPassword,
            "PHONE_NUMBER_UNOCCUPIED" => Self::SignUpRequired,
            "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" => Self::Transient {
                reason: name.to_string(),
                retry_after: value.map(|secs| Duration::from_secs(secs.into())),
            },
            _ if code == 420 || code >= 500 || name == "TIMEOUT" => Self::transient(name),
            _ => Self::Rejected(name.to_string()),
        }
    }

    /// Classify from an error's display text when only the message survives
    /// (e.g. `rpc error 400: PHONE_NUMBER_INVALID caused by auth.sendCode`)
    pub fn from_message(message: &str) -> Self {
        const KNOWN: &[&str] = &[
            "PHONE_NUMBER_INVALID",
            "PHONE_NUMBER_BANNED",
            "PHONE_NUMBER_FLOOD",
            "PHONE_CODE_INVALID",
            "PHONE_CODE_EMPTY",
            "PHONE_CODE_EXPIRED",
            "PASSWORD_HASH_INVALID",
            "PHONE_NUMBER_UNOCCUPIED",
        ];
        if let Some(name) = KNOWN.iter().find(|n| message.contains(*n)) {
            return Self::from_rpc(400, name, None);
        }
        if let Some(pos) = message.find("FLOOD_WAIT") {
            let secs = message[pos + "FLOOD_WAIT".len()..]
                .trim_start_matches(|c: char| c == '_' || c == ' ' || c == '(' || c == '=')
                .chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .ok();
            return Self::from_rpc(420, "FLOOD_WAIT", secs);
        }
        Self::transient(message)
    }
}

/// Starts logins against the external protocol
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Request a login code for `phone` and return the open handshake
    async fn send_code(&self, phone: &PhoneNumber) -> ProviderResult<Box<dyn AuthHandshake>>;
}

/// One in-flight login. Methods take `&self` so a failed call can be retried.
#[async_trait]
pub trait AuthHandshake: Send + Sync {
    async fn submit_code(&self, code: &str) -> ProviderResult<AuthChallenge>;

    async fn submit_password(&self, password: &str) -> ProviderResult<AuthChallenge>;

    /// Release protocol resources. Called once the request leaves the active set.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_classification() {
        assert_eq!(
            ProviderError::from_rpc(400, "PHONE_NUMBER_INVALID", None),
            ProviderError::PhoneNumberInvalid
        );
        assert_eq!(
            ProviderError::from_rpc(400, "PHONE_CODE_INVALID", None),
            ProviderError::InvalidCode
        );
        assert_eq!(
            ProviderError::from_rpc(400, "PHONE_CODE_EXPIRED", None),
            ProviderError::CodeExpired
        );
        assert_eq!(
            ProviderError::from_rpc(400, "PASSWORD_HASH_INVALID", None),
            ProviderError::InvalidPassword
        );
        assert!(matches!(
            ProviderError::from_rpc(400, "PHONE_NUMBER_BANNED", None),
            ProviderError::Rejected(_)
        ));
        assert!(ProviderError::from_rpc(500, "RPC_CALL_FAIL", None).is_transient());
    }

    #[test]
    fn test_flood_wait_carries_delay() {
        let err = ProviderError::from_rpc(420, "FLOOD_WAIT", Some(30));
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(err.is_retryable_within(Duration::from_secs(60)));
        assert!(!err.is_retryable_within(Duration::from_secs(5)));
    }

    #[test]
    fn test_from_message() {
        assert_eq!(
            ProviderError::from_message("rpc error 400: PHONE_NUMBER_INVALID caused by auth.sendCode"),
            ProviderError::PhoneNumberInvalid
        );
        let flood = ProviderError::from_message("rpc error 420: FLOOD_WAIT (value: 17)");
        assert_eq!(flood.retry_after(), None);
        assert!(flood.is_transient());

        let flood = ProviderError::from_message("FLOOD_WAIT_17");
        assert_eq!(flood.retry_after(), Some(Duration::from_secs(17)));

        assert!(ProviderError::from_message("connection reset by peer").is_transient());
    }

    #[test]
    fn test_challenge_debug_hides_session() {
        let challenge = AuthChallenge::Authorized {
            session_blob: Zeroizing::new(b"secret-session".to_vec()),
            account: None,
        };
        let text = format!("{:?}", challenge);
        assert!(!text.contains("secret"));
        assert!(text.contains("14 bytes"));
    }
}

//! Credential types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::credential::cipher::SealedBlob;
use crate::types::{PhoneNumber, UserIdentity};

/// Account the session was issued for, as reported by Telegram at sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Telegram user id
    pub user_id: i64,
    /// Public username, if the account has one
    pub username: Option<String>,
    /// Human readable name for listings
    pub display_name: String,
}

/// Reusable Telegram session issued by a completed provisioning flow.
///
/// Immutable once issued. Re-provisioning replaces it wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub user_identity: UserIdentity,
    pub phone_number: PhoneNumber,
    /// Opaque session bytes produced by the auth protocol
    pub session_blob: Zeroizing<Vec<u8>>,
    pub issued_at: DateTime<Utc>,
    pub account: Option<AccountInfo>,
}

impl SessionCredential {
    pub fn new(
        user_identity: UserIdentity,
        phone_number: PhoneNumber,
        session_blob: Vec<u8>,
        account: Option<AccountInfo>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_identity,
            phone_number,
            session_blob: Zeroizing::new(session_blob),
            issued_at,
            account,
        }
    }

    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            user_identity: self.user_identity.clone(),
            phone_masked: self.phone_number.masked(),
            issued_at: self.issued_at,
            account: self.account.clone(),
        }
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("user_identity", &self.user_identity)
            .field("phone_number", &self.phone_number)
            .field("session_blob", &format_args!("<{} bytes>", self.session_blob.len()))
            .field("issued_at", &self.issued_at)
            .field("account", &self.account)
            .finish()
    }
}

/// Credential metadata without the session blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub user_identity: UserIdentity,
    pub phone_masked: String,
    pub issued_at: DateTime<Utc>,
    pub account: Option<AccountInfo>,
}

/// Current on-disk record layout version
pub const RECORD_VERSION: u32 = 1;

/// Persisted form of a credential: clear metadata plus the sealed blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub version: u32,
    pub user_identity: UserIdentity,
    pub phone_number: PhoneNumber,
    pub issued_at: DateTime<Utc>,
    pub account: Option<AccountInfo>,
    #[serde(flatten)]
    pub sealed: SealedBlob,
}

impl StoredRecord {
    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            user_identity: self.user_identity.clone(),
            phone_masked: self.phone_number.masked(),
            issued_at: self.issued_at,
            account: self.account.clone(),
        }
    }
}

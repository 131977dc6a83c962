//! tsp-core: Telegram Session Provisioning core library
//!
//! Drives the multi-step Telegram login (phone, code, optional two-factor
//! password) for end users and keeps the resulting session credentials in
//! an encrypted store.

pub mod config;
pub mod credential;
pub mod error;
pub mod provider;
pub mod provisioner;
pub mod types;

pub use config::{
    ApiConfig, Config, ProviderKind, ProvisioningConfig, RetryConfig, S3Config, StorageBackendKind,
    StorageConfig, TelegramConfig,
};
pub use credential::{
    AccountInfo, CredentialCipher, CredentialStore, CredentialSummary, EncryptedCredentialStore,
    SessionCredential, StoreError, open_store,
};
pub use error::{Error, Result};
pub use provider::{AuthChallenge, AuthHandshake, AuthProvider, MockAuthProvider, ProviderError};
#[cfg(feature = "mtproto")]
pub use provider::MtprotoAuthProvider;
pub use provisioner::{
    ChallengeResult, ErrorKind, ProvisionError, Provisioner, ProvisionerSettings,
    ProvisioningState, RequestStatus,
};
pub use types::{PhoneNumber, RequestId, UserIdentity, ValidationError};

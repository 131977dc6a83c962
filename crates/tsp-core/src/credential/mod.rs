//! Credential store
//!
//! Durable, encrypted persistence of issued Telegram sessions keyed by user
//! identity. [`EncryptedCredentialStore`] seals each record and writes it as a
//! single object through an [`ObjectBackend`].

pub mod backend;
pub mod cipher;
pub mod error;
pub mod store;
pub mod types;

pub use backend::{MemoryBackend, ObjectBackend, S3Backend, S3Settings, SqliteBackend};
pub use cipher::{CredentialCipher, CryptoError};
pub use error::{StoreError, StoreResult};
pub use store::{CredentialStore, EncryptedCredentialStore};
pub use types::{AccountInfo, CredentialSummary, SessionCredential};

use std::sync::Arc;

use tracing::warn;

use crate::config::{StorageBackendKind, StorageConfig};
use crate::{Error, Result};

/// Build the encrypted store described by `config`
pub fn open_store(config: &StorageConfig) -> Result<EncryptedCredentialStore> {
    let key = config
        .encryption_key
        .as_deref()
        .ok_or_else(|| Error::Config("storage.encryption_key is required".to_string()))?;
    let cipher = CredentialCipher::from_base64(key)?;

    let backend: Arc<dyn ObjectBackend> = match config.backend {
        StorageBackendKind::Sqlite => Arc::new(SqliteBackend::new(&config.db_path)?),
        StorageBackendKind::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| Error::Config("[storage.s3] section is missing".to_string()))?;
            Arc::new(S3Backend::new(S3Settings {
                endpoint: s3.endpoint.clone(),
                bucket: s3.bucket.clone(),
                region: s3.region.clone(),
                access_key_id: s3.access_key_id.clone(),
                secret_access_key: s3.secret_access_key.clone(),
                prefix: s3.prefix.clone(),
            })?)
        }
        StorageBackendKind::Memory => {
            warn!("Using the in-memory credential store; sessions are lost on restart");
            Arc::new(MemoryBackend::new())
        }
    };

    Ok(EncryptedCredentialStore::new(backend, cipher))
}

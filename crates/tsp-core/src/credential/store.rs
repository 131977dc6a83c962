//! Credential store contract and its encrypted implementation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::credential::backend::ObjectBackend;
use crate::credential::cipher::CredentialCipher;
use crate::credential::error::{StoreError, StoreResult};
use crate::credential::types::{CredentialSummary, RECORD_VERSION, SessionCredential, StoredRecord};
use crate::types::UserIdentity;

/// Durable key-value persistence for session credentials, keyed by identity
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store `credential` under its identity, replacing any previous one.
    /// The write is all-or-nothing.
    async fn put(&self, credential: &SessionCredential) -> StoreResult<()>;

    /// Fetch the credential for `identity`, or `StoreError::NotFound`
    async fn get(&self, identity: &UserIdentity) -> StoreResult<SessionCredential>;

    /// Remove the credential for `identity`; absent identities are a no-op
    async fn delete(&self, identity: &UserIdentity) -> StoreResult<()>;

    /// Metadata of every stored credential
    async fn list(&self) -> StoreResult<Vec<CredentialSummary>>;
}

/// [`CredentialStore`] that seals blobs before handing records to a backend
pub struct EncryptedCredentialStore {
    backend: Arc<dyn ObjectBackend>,
    cipher: CredentialCipher,
}

impl EncryptedCredentialStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, cipher: CredentialCipher) -> Self {
        info!("Credential store ready (backend: {})", backend.name());
        Self { backend, cipher }
    }

    fn seal(&self, credential: &SessionCredential) -> StoreResult<Vec<u8>> {
        let sealed = self.cipher.seal(
            &credential.session_blob,
            credential.user_identity.as_str().as_bytes(),
        )?;
        let record = StoredRecord {
            version: RECORD_VERSION,
            user_identity: credential.user_identity.clone(),
            phone_number: credential.phone_number.clone(),
            issued_at: credential.issued_at,
            account: credential.account.clone(),
            sealed,
        };
        Ok(serde_json::to_vec(&record)?)
    }

    fn parse(bytes: &[u8]) -> StoreResult<StoredRecord> {
        let record: StoredRecord =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if record.version != RECORD_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported record version {}",
                record.version
            )));
        }
        Ok(record)
    }

    fn open(&self, identity: &UserIdentity, bytes: &[u8]) -> StoreResult<SessionCredential> {
        let record = Self::parse(bytes)?;
        if &record.user_identity != identity {
            return Err(StoreError::Corrupt(format!(
                "record for {} stored under {}",
                record.user_identity, identity
            )));
        }
        let blob = self
            .cipher
            .open(&record.sealed, identity.as_str().as_bytes())?;

        Ok(SessionCredential::new(
            record.user_identity,
            record.phone_number,
            blob.to_vec(),
            record.account,
            record.issued_at,
        ))
    }
}

#[async_trait]
impl CredentialStore for EncryptedCredentialStore {
    async fn put(&self, credential: &SessionCredential) -> StoreResult<()> {
        let bytes = self.seal(credential)?;
        self.backend
            .put_object(credential.user_identity.as_str(), bytes)
            .await?;
        info!(
            "Stored credential for {} ({})",
            credential.user_identity,
            credential.phone_number.masked()
        );
        Ok(())
    }

    async fn get(&self, identity: &UserIdentity) -> StoreResult<SessionCredential> {
        match self.backend.get_object(identity.as_str()).await? {
            Some(bytes) => self.open(identity, &bytes),
            None => Err(StoreError::NotFound(identity.clone())),
        }
    }

    async fn delete(&self, identity: &UserIdentity) -> StoreResult<()> {
        self.backend.delete_object(identity.as_str()).await?;
        info!("Deleted credential for {}", identity);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<CredentialSummary>> {
        let mut summaries = Vec::new();
        for key in self.backend.list_keys().await? {
            let Some(bytes) = self.backend.get_object(&key).await? else {
                // Deleted between listing and fetching.
                continue;
            };
            match Self::parse(&bytes) {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => warn!("Skipping unreadable credential record {}: {}", key, e),
            }
        }
        summaries.sort_by(|a, b| a.user_identity.cmp(&b.user_identity));
        debug!("Listed {} credentials", summaries.len());
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::backend::MemoryBackend;
    use crate::credential::types::AccountInfo;
    use crate::types::PhoneNumber;
    use chrono::Utc;

    fn store_with(backend: Arc<MemoryBackend>) -> EncryptedCredentialStore {
        EncryptedCredentialStore::new(backend, CredentialCipher::new(&[3u8; 32]).unwrap())
    }

    fn credential(id: &str, blob: &[u8]) -> SessionCredential {
        SessionCredential::new(
            UserIdentity::parse(id).unwrap(),
            PhoneNumber::parse("+10000000000").unwrap(),
            blob.to_vec(),
            Some(AccountInfo {
                user_id: 42,
                username: Some("alice".to_string()),
                display_name: "Alice".to_string(),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = store_with(Arc::new(MemoryBackend::new()));
        let cred = credential("u1", b"blob-1");

        store.put(&cred).await.unwrap();
        let loaded = store.get(&cred.user_identity).await.unwrap();

        assert_eq!(loaded, cred);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = store_with(Arc::new(MemoryBackend::new()));
        store.put(&credential("u1", b"old")).await.unwrap();
        store.put(&credential("u1", b"new")).await.unwrap();

        let loaded = store.get(&UserIdentity::parse("u1").unwrap()).await.unwrap();
        assert_eq!(loaded.session_blob.as_slice(), b"new");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let store = store_with(Arc::new(MemoryBackend::new()));
        let cred = credential("u1", b"blob");
        store.put(&cred).await.unwrap();

        store.delete(&cred.user_identity).await.unwrap();

        assert!(matches!(
            store.get(&cred.user_identity).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let store = store_with(Arc::new(MemoryBackend::new()));
        store
            .delete(&UserIdentity::parse("ghost").unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_blob_is_not_stored_in_clear() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        store.put(&credential("u1", b"plaintext-session")).await.unwrap();

        let raw = backend.get_object("u1").await.unwrap().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(!text.contains("plaintext-session"));
        assert!(text.contains("\"user_identity\":\"u1\""));
    }

    #[tokio::test]
    async fn test_record_moved_to_other_key_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        store.put(&credential("u1", b"blob")).await.unwrap();

        let raw = backend.get_object("u1").await.unwrap().unwrap();
        backend.put_object("u2", raw).await.unwrap();

        assert!(matches!(
            store.get(&UserIdentity::parse("u2").unwrap()).await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_list_returns_sorted_summaries() {
        let store = store_with(Arc::new(MemoryBackend::new()));
        store.put(&credential("zed", b"1")).await.unwrap();
        store.put(&credential("amy", b"2")).await.unwrap();

        let list = store.list().await.unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.user_identity.as_str()).collect();
        assert_eq!(ids, vec!["amy", "zed"]);
        assert_eq!(list[0].account.as_ref().unwrap().user_id, 42);
    }
}

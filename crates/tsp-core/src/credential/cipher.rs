//! Encryption of session blobs at rest
//!
//! Blobs are sealed with AES-256-GCM. The data key is derived from the
//! configured master key with HKDF-SHA256, and the owning user identity is
//! bound as associated data.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

const HKDF_SALT: &[u8] = b"tsp-gateway/credential-store";
const HKDF_INFO: &[u8] = b"aes-256-gcm/v1";

/// Minimum master key length in bytes
pub const MIN_MASTER_KEY_LEN: usize = 32;

/// Encryption error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    #[error("Invalid key: {0}")]
    InvalidKeyError(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Sealed blob as stored inside a credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    /// Base64-encoded 96-bit nonce
    pub nonce: String,
    /// Base64-encoded ciphertext with the GCM tag appended
    pub ciphertext: String,
}

/// AES-256-GCM cipher for credential blobs
pub struct CredentialCipher {
    key: Zeroizing<[u8; 32]>,
    rng: SystemRandom,
}

impl CredentialCipher {
    /// Create a cipher from raw master key bytes
    pub fn new(master_key: &[u8]) -> CryptoResult<Self> {
        if master_key.len() < MIN_MASTER_KEY_LEN {
            return Err(CryptoError::InvalidKeyError(format!(
                "master key must be at least {} bytes",
                MIN_MASTER_KEY_LEN
            )));
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), master_key);
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(HKDF_INFO, &mut key[..])
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;

        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    /// Create a cipher from a base64-encoded master key (the config format)
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let raw = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| CryptoError::InvalidKeyError(format!("invalid base64: {}", e)))?,
        );
        Self::new(&raw)
    }

    /// Generate a fresh random master key, base64-encoded
    pub fn generate_key() -> CryptoResult<String> {
        let mut raw = Zeroizing::new([0u8; MIN_MASTER_KEY_LEN]);
        SystemRandom::new()
            .fill(&mut raw[..])
            .map_err(|_| CryptoError::KeyDerivationError("system RNG unavailable".to_string()))?;
        Ok(BASE64.encode(&raw[..]))
    }

    fn aead_key(&self) -> CryptoResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key[..])
            .map_err(|_| CryptoError::InvalidKeyError("AES-256-GCM key rejected".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Seal `plaintext`, binding it to `associated` (the user identity)
    pub fn seal(&self, plaintext: &[u8], associated: &[u8]) -> CryptoResult<SealedBlob> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::EncryptionError("nonce generation failed".to_string()))?;

        let mut in_out = plaintext.to_vec();
        self.aead_key()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(associated),
                &mut in_out,
            )
            .map_err(|_| CryptoError::EncryptionError("seal failed".to_string()))?;

        Ok(SealedBlob {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&in_out),
        })
    }

    /// Open a sealed blob; fails if the key or the associated data differ
    pub fn open(&self, sealed: &SealedBlob, associated: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let nonce_raw = BASE64
            .decode(&sealed.nonce)
            .map_err(|e| CryptoError::DecryptionError(format!("Invalid base64 nonce: {}", e)))?;
        let nonce_bytes: [u8; NONCE_LEN] = nonce_raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptionError("nonce must be 12 bytes".to_string()))?;

        let mut buf = Zeroizing::new(
            BASE64
                .decode(&sealed.ciphertext)
                .map_err(|e| CryptoError::DecryptionError(format!("Invalid base64 ciphertext: {}", e)))?,
        );

        let plaintext_len = self
            .aead_key()?
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(associated),
                buf.as_mut_slice(),
            )
            .map_err(|_| CryptoError::DecryptionError("authentication failed".to_string()))?
            .len();

        buf.truncate(plaintext_len);
        Ok(buf)
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(byte: u8) -> CredentialCipher {
        CredentialCipher::new(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_seal_open() {
        let cipher = cipher(7);
        let sealed = cipher.seal(b"session-bytes", b"u1").unwrap();
        let opened = cipher.open(&sealed, b"u1").unwrap();
        assert_eq!(opened.as_slice(), b"session-bytes");
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let cipher = cipher(7);
        let a = cipher.seal(b"same", b"u1").unwrap();
        let b = cipher.seal(b"same", b"u1").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_open_with_other_identity_fails() {
        let cipher = cipher(7);
        let sealed = cipher.seal(b"session-bytes", b"u1").unwrap();
        assert!(matches!(
            cipher.open(&sealed, b"u2"),
            Err(CryptoError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_open_with_other_key_fails() {
        let sealed = cipher(7).seal(b"session-bytes", b"u1").unwrap();
        assert!(cipher(8).open(&sealed, b"u1").is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            CredentialCipher::new(b"too-short"),
            Err(CryptoError::InvalidKeyError(_))
        ));
    }

    #[test]
    fn test_generated_key_is_usable() {
        let key = CredentialCipher::generate_key().unwrap();
        let cipher = CredentialCipher::from_base64(&key).unwrap();
        let sealed = cipher.seal(b"x", b"u1").unwrap();
        assert_eq!(cipher.open(&sealed, b"u1").unwrap().as_slice(), b"x");
    }
}

//! Byte-level object backends for the credential store

mod memory;
mod s3;
mod sqlite;

pub use memory::MemoryBackend;
pub use s3::{S3Backend, S3Settings, SigV4Signer};
pub use sqlite::SqliteBackend;

use async_trait::async_trait;

use crate::credential::error::StoreResult;

/// Durable object storage addressed by key.
///
/// `put_object` must replace the whole object atomically: readers see the
/// old bytes or the new bytes, never a mix.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()>;

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete `key`; absent keys are not an error
    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    async fn list_keys(&self) -> StoreResult<Vec<String>>;
}

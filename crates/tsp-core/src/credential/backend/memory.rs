//! In-memory backend (tests and throwaway runs)

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::ObjectBackend;
use crate::credential::error::StoreResult;

#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|v| v.clone()))
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.objects.iter().map(|e| e.key().clone()).collect())
    }
}

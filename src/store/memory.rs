use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{
    join_url, object_path, validate_key, ContentStore, ObjectMeta, StoredObject, WriteOutcome,
};
use crate::types::Result;

/// Process-local store, served by the facade's own `/blobs/` route.
pub struct MemoryStore {
    public_url: String,
    objects: RwLock<HashMap<String, (StoredObject, Bytes)>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into(),
            objects: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Writes that created an object, not counting lost races.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<Option<StoredObject>> {
        validate_key(key)?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).map(|(object, _)| object.clone()))
    }

    async fn write(&self, key: &str, content: Bytes, meta: &ObjectMeta) -> Result<WriteOutcome> {
        validate_key(key)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Ok(WriteOutcome::AlreadyExists);
        }
        let object = StoredObject {
            digest: meta.digest.clone(),
            media_type: meta.media_type.clone(),
            size: content.len() as u64,
        };
        objects.insert(key.to_string(), (object, content));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Written)
    }

    fn redirect_url(&self, key: &str) -> String {
        join_url(&self.public_url, &object_path(key))
    }

    async fn read(&self, key: &str) -> Result<Option<(StoredObject, Bytes)>> {
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }
}

//! Write-once, content-addressed object storage.
//!
//! Objects live in a flat `blobs/<key>` namespace where the key is either a
//! content digest or a strategy cache key. A write never replaces an existing
//! object: losing a race to the same key reports [`WriteOutcome::AlreadyExists`],
//! which callers treat as success because content is a pure function of the key.

pub mod fs;
pub mod gcs;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::types::Result;

pub use fs::FsStore;
pub use gcs::GcsStore;
pub use memory::MemoryStore;

pub const BLOB_PREFIX: &str = "blobs/";

/// Metadata recorded alongside every object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub digest: Digest,
    pub media_type: String,
}

impl ObjectMeta {
    pub fn new(digest: Digest, media_type: impl Into<String>) -> Self {
        Self {
            digest,
            media_type: media_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub digest: Digest,
    pub media_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyExists,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Look an object up without side effects. `Ok(None)` means absent;
    /// an unreachable store is an error, never a miss.
    async fn exists(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Create `key` only if it does not exist yet.
    async fn write(&self, key: &str, content: Bytes, meta: &ObjectMeta) -> Result<WriteOutcome>;

    /// Public URL clients are redirected to for `key`.
    fn redirect_url(&self, key: &str) -> String;

    async fn read(&self, key: &str) -> Result<Option<(StoredObject, Bytes)>>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

pub fn object_path(key: &str) -> String {
    format!("{BLOB_PREFIX}{key}")
}

/// Keys are single path segments: digests, cache keys and placeholders.
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key.bytes().all(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b':' | b'-' | b'_' | b'.' | b'+' | b'=')
        });
    if valid {
        Ok(())
    } else {
        Err(SynthError::InvalidInput(format!("invalid object key '{key}'")))
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_must_be_single_segments() {
        assert!(validate_key("sha256:abcd").is_ok());
        assert!(validate_key("flatten-0123abcd").is_ok());
        assert!(validate_key("placeholder-wait-00ff").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(".hidden").is_err());
    }

    #[test]
    fn urls_join_cleanly() {
        assert_eq!(join_url("http://h/", "/blobs/x"), "http://h/blobs/x");
        assert_eq!(join_url("http://h", "blobs/x"), "http://h/blobs/x");
        assert_eq!(object_path("sha256:1"), "blobs/sha256:1");
    }
}

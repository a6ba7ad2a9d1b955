use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{
    join_url, object_path, validate_key, ContentStore, ObjectMeta, StoredObject, WriteOutcome,
};
use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::types::Result;

const DATA_FILE: &str = "data";
const META_FILE: &str = "meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
    digest: Digest,
    media_type: String,
}

/// Directory-backed store. Each object is a directory `<root>/blobs/<key>/`
/// holding `data` and `meta.json`.
///
/// Both files are staged together in a fresh directory under `<root>/tmp`
/// and renamed into place in one step. A rename onto an existing non-empty
/// directory fails, so the first writer of a key wins and bytes and metadata
/// always come from the same writer.
pub struct FsStore {
    root: PathBuf,
    public_url: String,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Result<Self> {
        let root = root.into();
        for dir in ["blobs", "tmp"] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| {
                SynthError::StoreUnavailable(format!("cannot create {}: {e}", path.display()))
            })?;
        }
        Ok(Self {
            root,
            public_url: public_url.into(),
        })
    }

    fn object_dir(&self, key: &str) -> PathBuf {
        self.root.join("blobs").join(key)
    }

    async fn load_meta(&self, key: &str) -> Result<Option<MetaFile>> {
        match tokio::fs::read(self.object_dir(key).join(META_FILE)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_io(e)),
        }
    }
}

fn store_io(err: std::io::Error) -> SynthError {
    SynthError::StoreUnavailable(format!("filesystem store: {err}"))
}

fn write_once(
    root: &Path,
    target: &Path,
    content: &[u8],
    meta: &MetaFile,
) -> std::io::Result<WriteOutcome> {
    if target.exists() {
        return Ok(WriteOutcome::AlreadyExists);
    }
    let staged = tempfile::TempDir::new_in(root.join("tmp"))?;

    let mut data = std::fs::File::create(staged.path().join(DATA_FILE))?;
    data.write_all(content)?;
    data.sync_all()?;
    let mut meta_file = std::fs::File::create(staged.path().join(META_FILE))?;
    meta_file.write_all(&serde_json::to_vec(meta)?)?;
    meta_file.sync_all()?;

    match std::fs::rename(staged.path(), target) {
        Ok(()) => Ok(WriteOutcome::Written),
        Err(_) if target.join(META_FILE).exists() => Ok(WriteOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ContentStore for FsStore {
    async fn exists(&self, key: &str) -> Result<Option<StoredObject>> {
        validate_key(key)?;
        let Some(meta) = self.load_meta(key).await? else {
            return Ok(None);
        };
        let size = tokio::fs::metadata(self.object_dir(key).join(DATA_FILE))
            .await
            .map_err(store_io)?
            .len();
        Ok(Some(StoredObject {
            digest: meta.digest,
            media_type: meta.media_type,
            size,
        }))
    }

    async fn write(&self, key: &str, content: Bytes, meta: &ObjectMeta) -> Result<WriteOutcome> {
        validate_key(key)?;
        let root = self.root.clone();
        let target = self.object_dir(key);
        let meta = MetaFile {
            digest: meta.digest.clone(),
            media_type: meta.media_type.clone(),
        };
        tokio::task::spawn_blocking(move || write_once(&root, &target, &content, &meta))
            .await
            .map_err(|e| SynthError::StoreUnavailable(format!("write task failed: {e}")))?
            .map_err(store_io)
    }

    fn redirect_url(&self, key: &str) -> String {
        join_url(&self.public_url, &object_path(key))
    }

    async fn read(&self, key: &str) -> Result<Option<(StoredObject, Bytes)>> {
        validate_key(key)?;
        let Some(meta) = self.load_meta(key).await? else {
            return Ok(None);
        };
        let content = tokio::fs::read(self.object_dir(key).join(DATA_FILE))
            .await
            .map_err(store_io)?;
        let object = StoredObject {
            digest: meta.digest,
            media_type: meta.media_type,
            size: content.len() as u64,
        };
        Ok(Some((object, Bytes::from(content))))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        // Unlink in one rename; the staging directory removes the rest on drop.
        let graveyard = tempfile::TempDir::new_in(self.root.join("tmp")).map_err(store_io)?;
        match tokio::fs::rename(self.object_dir(key), graveyard.path().join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_io(e)),
        }
    }
}

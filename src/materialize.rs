//! Persisting synthesized images into the content store.
//!
//! Every blob is written under its digest first. Aliases (cache keys) are
//! written only after every other write of the image has succeeded, so an
//! alias existing in the store means the whole image is there.

use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use log::debug;
use std::sync::Arc;

use crate::oci::image::{Blob, Image, ImageIndex, IndexChild, Synthesized};
use crate::oci::model::Descriptor;
use crate::store::{ContentStore, ObjectMeta, WriteOutcome};
use crate::types::Result;

#[derive(Clone)]
pub struct Materializer {
    store: Arc<dyn ContentStore>,
}

impl Materializer {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub async fn persist(
        &self,
        synthesized: &Synthesized,
        aliases: &[String],
    ) -> Result<Descriptor> {
        match synthesized {
            Synthesized::Image(image) => self.persist_image(image, aliases).await,
            Synthesized::Index(index) => self.persist_index(index, aliases).await,
        }
    }

    pub async fn persist_image(&self, image: &Image, aliases: &[String]) -> Result<Descriptor> {
        let layers = image.layers().iter().map(|l| l.blob());
        let blobs = std::iter::once(image.config()).chain(layers);
        try_join_all(blobs.map(|blob| async move {
            self.write_blob(&blob.digest().to_string(), blob).await
        }))
        .await?;
        self.finish(image.manifest_blob(), aliases).await
    }

    pub async fn persist_index(
        &self,
        index: &ImageIndex,
        aliases: &[String],
    ) -> Result<Descriptor> {
        try_join_all(index.children().iter().map(|child| self.persist_child(child))).await?;
        self.finish(index.manifest_blob(), aliases).await
    }

    fn persist_child<'a>(&'a self, child: &'a IndexChild) -> BoxFuture<'a, Result<Descriptor>> {
        async move {
            match child {
                IndexChild::Image(image) => self.persist_image(image, &[]).await,
                IndexChild::Index(index) => self.persist_index(index, &[]).await,
            }
        }
        .boxed()
    }

    async fn finish(&self, manifest: &Blob, aliases: &[String]) -> Result<Descriptor> {
        let digest_key = manifest.digest().to_string();
        self.write_blob(&digest_key, manifest).await?;
        for alias in aliases.iter().filter(|alias| **alias != digest_key) {
            self.write_blob(alias, manifest).await?;
        }
        Ok(manifest.descriptor())
    }

    async fn write_blob(&self, key: &str, blob: &Blob) -> Result<()> {
        let meta = ObjectMeta::new(blob.digest().clone(), blob.media_type());
        match self.store.write(key, blob.data().clone(), &meta).await? {
            WriteOutcome::Written => debug!("wrote blob {key}"),
            WriteOutcome::AlreadyExists => debug!("blob {key} already exists"),
        }
        Ok(())
    }
}

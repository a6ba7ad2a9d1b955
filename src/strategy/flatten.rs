use async_trait::async_trait;
use std::sync::Arc;

use super::mirror::upstream_reference;
use super::{blocking, Resolved, Strategy};
use crate::cache_key::{derive_key, KeyMaterial};
use crate::oci::image::{Image, ImageIndex, IndexChild, IndexEntry, Synthesized};
use crate::oci::layer;
use crate::oci::model::HistoryBuilder;
use crate::reference::ImageReference;
use crate::types::Result;
use crate::upstream::{self, Upstream, UpstreamReference};

/// Squashes every image into a single layer holding its merged filesystem.
pub struct FlattenStrategy {
    upstream: Arc<dyn Upstream>,
    default_registry: String,
    self_host: Option<String>,
}

impl FlattenStrategy {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        default_registry: impl Into<String>,
        self_host: Option<String>,
    ) -> Self {
        Self {
            upstream,
            default_registry: default_registry.into(),
            self_host,
        }
    }
}

#[async_trait]
impl Strategy for FlattenStrategy {
    type Input = UpstreamReference;

    fn name(&self) -> &'static str {
        "flatten"
    }

    async fn resolve(&self, reference: &ImageReference) -> Result<Resolved<UpstreamReference>> {
        let upstream_ref =
            upstream_reference(reference, &self.default_registry, self.self_host.as_deref())?;
        let digest = self.upstream.manifest(&upstream_ref).await?.digest;
        let key = derive_key(
            self.name(),
            &KeyMaterial::new().field("image", digest.to_string()),
        );
        Ok(Resolved::new(key, upstream_ref.with_digest(digest)))
    }

    async fn transform(&self, resolved: &Resolved<UpstreamReference>) -> Result<Synthesized> {
        let pulled = upstream::pull(self.upstream.as_ref(), &resolved.input).await?;
        blocking(move || match pulled {
            Synthesized::Image(image) => Ok(flatten_image(&image)?.into()),
            Synthesized::Index(index) => Ok(flatten_index(&index)?.into()),
        })
        .await
    }
}

pub fn flatten_image(image: &Image) -> Result<Image> {
    let mut config = image.config_file()?;
    let merged = layer::flatten(image.layers())?;
    let flat_layer = layer::layer_from_tar(&merged)?;

    let mut history = HistoryBuilder::default()
        .created_by("kontain flatten")
        .comment(format!("flattened from {}", image.digest()));
    if let Some(created) = config.created() {
        history = history.created(created.clone());
    }
    config.set_author(None);
    config.set_history(vec![history.build()?]);
    Image::build(config, vec![flat_layer])
}

/// Flatten each child, keeping the platform each index entry advertises.
pub fn flatten_index(index: &ImageIndex) -> Result<ImageIndex> {
    let manifest = index.index_manifest()?;
    let mut entries = Vec::with_capacity(index.children().len());
    for (child, descriptor) in index.children().iter().zip(manifest.manifests().iter()) {
        let child = match child {
            IndexChild::Image(image) => IndexChild::Image(flatten_image(image)?),
            IndexChild::Index(nested) => IndexChild::Index(flatten_index(nested)?),
        };
        entries.push(IndexEntry {
            child,
            template: Some(descriptor.clone()),
        });
    }
    ImageIndex::build(None, entries)
}

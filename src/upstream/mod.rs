//! Reading images from upstream registries.

pub mod reference;
pub mod registry;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::{try_join_all, BoxFuture, FutureExt};

use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::oci::image::{
    parse_image_manifest, parse_index_manifest, Blob, Image, ImageIndex, IndexChild, Layer,
    Synthesized,
};
use crate::oci::model::{
    descriptor_digest, diff_ids, parse_config, ManifestKind, DOCKER_SCHEMA1, DOCKER_SCHEMA1_SIGNED,
};
use crate::types::Result;

pub use reference::{UpstreamReference, DOCKER_HUB_REGISTRY};
pub use registry::RegistryClient;

/// A manifest document exactly as the upstream served it.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub media_type: String,
    pub digest: Digest,
    pub bytes: Bytes,
}

impl FetchedManifest {
    pub fn kind(&self) -> Result<ManifestKind> {
        if self.media_type == DOCKER_SCHEMA1 || self.media_type == DOCKER_SCHEMA1_SIGNED {
            return Err(SynthError::UnsupportedMediaType(self.media_type.clone()));
        }
        ManifestKind::of(&self.media_type)
            .ok_or_else(|| SynthError::UnsupportedMediaType(self.media_type.clone()))
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch the manifest behind `reference`. Digest references are
    /// verified against the returned bytes.
    async fn manifest(&self, reference: &UpstreamReference) -> Result<FetchedManifest>;

    /// Fetch a blob and verify it against `digest`.
    async fn blob(&self, reference: &UpstreamReference, digest: &Digest) -> Result<Bytes>;
}

/// The image or index behind `reference`, with every blob fetched.
pub async fn pull(upstream: &dyn Upstream, reference: &UpstreamReference) -> Result<Synthesized> {
    let fetched = upstream.manifest(reference).await?;
    pull_fetched(upstream, reference, fetched).await
}

pub async fn pull_fetched(
    upstream: &dyn Upstream,
    reference: &UpstreamReference,
    fetched: FetchedManifest,
) -> Result<Synthesized> {
    match fetched.kind()? {
        ManifestKind::Image => Ok(pull_image(upstream, reference, fetched).await?.into()),
        ManifestKind::Index => Ok(pull_index(upstream, reference, fetched).await?.into()),
    }
}

pub async fn pull_image(
    upstream: &dyn Upstream,
    reference: &UpstreamReference,
    fetched: FetchedManifest,
) -> Result<Image> {
    let manifest = parse_image_manifest(&fetched.bytes)?;
    let config_digest = descriptor_digest(manifest.config())?;
    let config_bytes = upstream.blob(reference, &config_digest).await?;
    let config_diff_ids = diff_ids(&parse_config(&config_bytes)?)?;
    let config = Blob::new(manifest.config().media_type().to_string(), config_bytes);

    let layers = try_join_all(manifest.layers().iter().enumerate().map(|(index, descriptor)| {
        let diff_id = config_diff_ids.get(index).cloned();
        async move {
            let digest = descriptor_digest(descriptor)?;
            let bytes = upstream.blob(reference, &digest).await?;
            let media_type = descriptor.media_type().to_string();
            Ok::<_, SynthError>(Layer::new(media_type, bytes, diff_id))
        }
    }))
    .await?;

    Image::from_raw(fetched.bytes, fetched.media_type, config, layers)
}

pub async fn pull_index(
    upstream: &dyn Upstream,
    reference: &UpstreamReference,
    fetched: FetchedManifest,
) -> Result<ImageIndex> {
    let index = parse_index_manifest(&fetched.bytes)?;
    let children = try_join_all(index.manifests().iter().map(|descriptor| async move {
        let child = reference.with_digest(descriptor_digest(descriptor)?);
        pull_child(upstream, child).await
    }))
    .await?;
    ImageIndex::from_raw(fetched.bytes, fetched.media_type, children)
}

fn pull_child<'a>(
    upstream: &'a dyn Upstream,
    reference: UpstreamReference,
) -> BoxFuture<'a, Result<IndexChild>> {
    async move {
        match pull(upstream, &reference).await? {
            Synthesized::Image(image) => Ok(IndexChild::Image(image)),
            Synthesized::Index(index) => Ok(IndexChild::Index(index)),
        }
    }
    .boxed()
}

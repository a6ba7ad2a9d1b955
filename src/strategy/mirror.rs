use async_trait::async_trait;
use std::sync::Arc;

use super::{Resolved, Strategy};
use crate::oci::image::Synthesized;
use crate::reference::{strip_host_prefix, ImageReference};
use crate::types::Result;
use crate::upstream::{self, Upstream, UpstreamReference};

/// Copies upstream images unchanged. The cache key is the upstream manifest
/// digest, so a tag is always re-resolved and never cached by name.
pub struct MirrorStrategy {
    upstream: Arc<dyn Upstream>,
    default_registry: String,
    self_host: Option<String>,
}

impl MirrorStrategy {
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

/// Map a facade reference onto the upstream image it names.
pub(crate) fn upstream_reference(
    reference: &ImageReference,
    default_registry: &str,
    self_host: Option<&str>,
) -> Result<UpstreamReference> {
    let path = match self_host {
        Some(host) => strip_host_prefix(&reference.repository, host),
        None => reference.repository.as_str(),
    };
    UpstreamReference::normalize(path, reference.identifier.clone(), default_registry)
}

#[async_trait]
impl Strategy for MirrorStrategy {
    type Input = UpstreamReference;

    fn name(&self) -> &'static str {
        "mirror"
    }

    async fn resolve(&self, reference: &ImageReference) -> Result<Resolved<UpstreamReference>> {
        let upstream_ref =
            upstream_reference(reference, &self.default_registry, self.self_host.as_deref())?;
        let digest = self.upstream.manifest(&upstream_ref).await?.digest;
        Ok(Resolved::new(digest.to_string(), upstream_ref.with_digest(digest)))
    }

    async fn transform(&self, resolved: &Resolved<UpstreamReference>) -> Result<Synthesized> {
        upstream::pull(self.upstream.as_ref(), &resolved.input).await
    }
}

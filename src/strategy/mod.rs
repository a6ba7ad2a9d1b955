//! Transformation strategies: the pluggable "produce an image" step behind
//! every facade.
//!
//! A strategy first resolves a request into a cache key plus whatever input
//! it needs, cheaply and without producing content. Only on a cache miss is
//! `transform` called to build the image or index.

pub mod flatten;
pub mod mirror;
pub mod packages;
pub mod random;
pub mod wait;

use async_trait::async_trait;

use crate::error::SynthError;
use crate::oci::image::Synthesized;
use crate::reference::ImageReference;
use crate::types::Result;

pub use flatten::FlattenStrategy;
pub use mirror::MirrorStrategy;
pub use packages::{CommandBuilder, PackageBuilder, PackagesStrategy};
pub use random::RandomStrategy;
pub use wait::{InProcessQueue, TaskQueue, WaitStrategy};

/// Outcome of input resolution: the key the output is cached under, and the
/// input `transform` needs to produce it.
#[derive(Debug, Clone)]
pub struct Resolved<I> {
    pub key: String,
    pub input: I,
}

impl<I> Resolved<I> {
    pub fn new(key: impl Into<String>, input: I) -> Self {
        Self {
            key: key.into(),
            input,
        }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync + 'static {
    type Input: Send + Sync;

    fn name(&self) -> &'static str;

    async fn resolve(&self, reference: &ImageReference) -> Result<Resolved<Self::Input>>;

    async fn transform(&self, resolved: &Resolved<Self::Input>) -> Result<Synthesized>;
}

/// Strategies whose tags are inputs cannot resolve arbitrary digests; a
/// digest only answers if it is already stored.
pub(crate) fn unknown_digest(reference: &ImageReference) -> SynthError {
    SynthError::NotFound(format!("{reference} is not in the cache"))
}

/// Run CPU-bound work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SynthError::TransformationFailed(format!("worker task failed: {e}")))?
}

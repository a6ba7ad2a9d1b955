use async_trait::async_trait;
use rand::RngCore;
use regex::Regex;
use std::sync::OnceLock;

use super::{blocking, unknown_digest, Resolved, Strategy};
use crate::cache_key::{derive_key, KeyMaterial};
use crate::error::SynthError;
use crate::oci::image::{Image, Synthesized};
use crate::oci::layer;
use crate::oci::model::base_config;
use crate::reference::{Identifier, ImageReference};
use crate::types::Result;

pub const DEFAULT_LAYERS: u32 = 1;
pub const DEFAULT_LAYER_SIZE: u64 = 10_000_000;
pub const DEFAULT_MAX_BYTES: u64 = 1 << 30;
const RANDOM_FILE: &str = "random_file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomSpec {
    pub layers: u32,
    pub layer_size: u64,
}

impl RandomSpec {
    /// `NxM` asks for N layers of M bytes; `latest` is one 10 MB layer.
    pub fn parse(tag: &str) -> Result<Self> {
        if tag == "latest" {
            return Ok(Self {
                layers: DEFAULT_LAYERS,
                layer_size: DEFAULT_LAYER_SIZE,
            });
        }
        let captures = spec_pattern().captures(tag).ok_or_else(|| {
            SynthError::InvalidInput(format!("tag '{tag}' is not of the form NxM"))
        })?;
        let number = |i: usize| captures.get(i).map(|m| m.as_str()).unwrap_or("0");
        let layers = number(1)
            .parse()
            .map_err(|_| SynthError::InvalidInput(format!("invalid layer count in '{tag}'")))?;
        let layer_size = number(2)
            .parse()
            .map_err(|_| SynthError::InvalidInput(format!("invalid layer size in '{tag}'")))?;
        Ok(Self { layers, layer_size })
    }

    pub fn total_bytes(&self) -> u64 {
        u64::from(self.layers) * self.layer_size
    }
}

fn spec_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([0-9]{1,2})x([0-9]{1,8})$").expect("NxM regex"))
}

/// A gzip tarball holding one file of `size` random bytes.
pub fn random_layer(size: u64) -> Result<crate::oci::image::Layer> {
    let mut contents = vec![0u8; size as usize];
    rand::thread_rng().fill_bytes(&mut contents);
    layer::layer_from_tar(&layer::single_file_tar(RANDOM_FILE, &contents)?)
}

pub fn random_image(spec: RandomSpec) -> Result<Image> {
    let layers = (0..spec.layers)
        .map(|_| random_layer(spec.layer_size))
        .collect::<Result<Vec<_>>>()?;
    Image::build(base_config("amd64", "linux")?, layers)
}

/// Generates images of random layers. The tag is the input, so the key
/// derives from the parsed size and the repository name: asking again for
/// the same name and size serves the same bytes.
pub struct RandomStrategy {
    max_bytes: u64,
}

impl RandomStrategy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

#[async_trait]
impl Strategy for RandomStrategy {
    type Input = RandomSpec;

    fn name(&self) -> &'static str {
        "random"
    }

    async fn resolve(&self, reference: &ImageReference) -> Result<Resolved<RandomSpec>> {
        let Identifier::Tag(tag) = &reference.identifier else {
            return Err(unknown_digest(reference));
        };
        let spec = RandomSpec::parse(tag)?;
        if spec.total_bytes() > self.max_bytes {
            return Err(SynthError::InvalidInput(format!(
                "{tag} asks for {} bytes of random data; the limit is {} bytes",
                spec.total_bytes(),
                self.max_bytes
            )));
        }
        let key = derive_key(
            self.name(),
            &KeyMaterial::new()
                .field("repository", &reference.repository)
                .field("layers", spec.layers.to_string())
                .field("size", spec.layer_size.to_string()),
        );
        Ok(Resolved::new(key, spec))
    }

    async fn transform(&self, resolved: &Resolved<RandomSpec>) -> Result<Synthesized> {
        let spec = resolved.input;
        blocking(move || Ok(random_image(spec)?.into())).await
    }
}

//! Manifest, index and config documents, as modelled by `oci-spec`, plus
//! the Docker media types that crate does not name.

use oci_spec::image::{MediaType, RootFsBuilder};

pub use oci_spec::image::{
    Config as ContainerConfig, ConfigBuilder as ContainerConfigBuilder, Descriptor, History,
    HistoryBuilder, ImageConfiguration as ConfigFile,
    ImageConfigurationBuilder as ConfigFileBuilder, ImageIndex as IndexManifest, ImageManifest,
    Platform, PlatformBuilder, RootFs,
};

use super::digest::Digest;
use crate::error::SynthError;
use crate::types::Result;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const OCI_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_SCHEMA1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Media types requested from upstream registries, most preferred first.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_INDEX,
    DOCKER_MANIFEST_LIST,
    OCI_MANIFEST,
    DOCKER_MANIFEST,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Image,
    Index,
}

impl ManifestKind {
    pub fn of(media_type: &str) -> Option<Self> {
        match media_type {
            OCI_MANIFEST | DOCKER_MANIFEST => Some(ManifestKind::Image),
            OCI_INDEX | DOCKER_MANIFEST_LIST => Some(ManifestKind::Index),
            _ => None,
        }
    }

    /// The media type a manifest of this kind gets when its document
    /// does not name one.
    pub fn default_media_type(&self) -> &'static str {
        match self {
            ManifestKind::Image => OCI_MANIFEST,
            ManifestKind::Index => OCI_INDEX,
        }
    }
}

pub fn descriptor(media_type: &str, digest: &Digest, size: u64) -> Descriptor {
    Descriptor::new(MediaType::from(media_type), size as i64, digest.to_string())
}

pub fn descriptor_digest(descriptor: &Descriptor) -> Result<Digest> {
    Digest::parse(descriptor.digest()).ok_or_else(|| {
        SynthError::InvalidInput(format!("invalid descriptor digest '{}'", descriptor.digest()))
    })
}

pub fn descriptor_size(descriptor: &Descriptor) -> u64 {
    u64::try_from(descriptor.size()).unwrap_or_default()
}

/// A config for `architecture`/`os` with an empty layer list and nothing
/// else set.
pub fn base_config(architecture: &str, os: &str) -> Result<ConfigFile> {
    let rootfs = RootFsBuilder::default()
        .typ("layers")
        .diff_ids(Vec::<String>::new())
        .build()?;
    Ok(ConfigFileBuilder::default()
        .architecture(architecture)
        .os(os)
        .rootfs(rootfs)
        .build()?)
}

pub fn parse_config(bytes: &[u8]) -> Result<ConfigFile> {
    serde_json::from_slice(bytes)
        .map_err(|e| SynthError::InvalidInput(format!("invalid image config: {e}")))
}

/// `rootfs.diff_ids` as digests, in layer order.
pub fn diff_ids(config: &ConfigFile) -> Result<Vec<Digest>> {
    config
        .rootfs()
        .diff_ids()
        .iter()
        .map(|id| {
            Digest::parse(id)
                .ok_or_else(|| SynthError::InvalidInput(format!("invalid diff id '{id}'")))
        })
        .collect()
}

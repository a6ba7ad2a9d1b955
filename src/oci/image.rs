//! In-memory images and indexes produced by transformation strategies.
//!
//! Every value here carries the exact manifest bytes that will be stored, so
//! the digest reported to clients is always the digest of what the store
//! serves. Images built from parts serialize their manifest once at
//! construction; images mirrored from upstream keep the upstream bytes.

use bytes::Bytes;
use oci_spec::image::{ImageIndexBuilder, ImageManifestBuilder, MediaType, RootFsBuilder};

use super::digest::Digest;
use super::model::{
    descriptor, descriptor_digest, ConfigFile, Descriptor, ImageManifest, IndexManifest,
    ManifestKind, OCI_CONFIG, OCI_INDEX, OCI_MANIFEST,
};
use crate::error::SynthError;
use crate::types::Result;

/// A content blob plus its media type and digest.
#[derive(Debug, Clone)]
pub struct Blob {
    media_type: String,
    digest: Digest,
    data: Bytes,
}

impl Blob {
    pub fn new(media_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            media_type: media_type.into(),
            digest: Digest::sha256(&data),
            data,
        }
    }

    pub fn descriptor(&self) -> Descriptor {
        descriptor(&self.media_type, &self.digest, self.size())
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    blob: Blob,
    diff_id: Option<Digest>,
}

impl Layer {
    pub fn new(
        media_type: impl Into<String>,
        compressed: impl Into<Bytes>,
        diff_id: Option<Digest>,
    ) -> Self {
        Self {
            blob: Blob::new(media_type, compressed),
            diff_id,
        }
    }

    pub fn descriptor(&self) -> Descriptor {
        self.blob.descriptor()
    }

    pub fn digest(&self) -> &Digest {
        self.blob.digest()
    }

    pub fn media_type(&self) -> &str {
        self.blob.media_type()
    }

    pub fn diff_id(&self) -> Option<&Digest> {
        self.diff_id.as_ref()
    }

    pub fn compressed(&self) -> &Bytes {
        self.blob.data()
    }

    pub(crate) fn blob(&self) -> &Blob {
        &self.blob
    }
}

#[derive(Debug, Clone)]
pub struct Image {
    manifest: Blob,
    config: Blob,
    layers: Vec<Layer>,
}

impl Image {
    /// Assemble an OCI image from a config and its layers. The config's
    /// `rootfs.diff_ids` is rewritten from the layers, so every layer must
    /// know its uncompressed digest.
    pub fn build(mut config: ConfigFile, layers: Vec<Layer>) -> Result<Self> {
        let diff_ids = layers
            .iter()
            .map(|layer| {
                layer.diff_id().map(Digest::to_string).ok_or_else(|| {
                    SynthError::TransformationFailed(format!(
                        "layer {} has no diff id",
                        layer.digest()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        config.set_rootfs(RootFsBuilder::default().typ("layers").diff_ids(diff_ids).build()?);

        let config = Blob::new(OCI_CONFIG, serde_json::to_vec(&config)?);
        let manifest = ImageManifestBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::ImageManifest)
            .config(config.descriptor())
            .layers(layers.iter().map(Layer::descriptor).collect::<Vec<_>>())
            .build()?;
        let manifest = Blob::new(OCI_MANIFEST, serde_json::to_vec(&manifest)?);

        Ok(Self {
            manifest,
            config,
            layers,
        })
    }

    /// Wrap manifest bytes fetched from elsewhere together with the blobs
    /// they reference. Fails if the blobs are not the ones the manifest names.
    pub fn from_raw(
        manifest: impl Into<Bytes>,
        media_type: impl Into<String>,
        config: Blob,
        layers: Vec<Layer>,
    ) -> Result<Self> {
        let manifest = Blob::new(media_type, manifest);
        let parsed = parse_image_manifest(manifest.data())?;
        let named_config = descriptor_digest(parsed.config())?;
        if named_config != *config.digest() {
            return Err(SynthError::InvalidInput(format!(
                "config {} does not match manifest config {named_config}",
                config.digest(),
            )));
        }
        let named_layers = parsed
            .layers()
            .iter()
            .map(descriptor_digest)
            .collect::<Result<Vec<_>>>()?;
        if named_layers.len() != layers.len()
            || named_layers
                .iter()
                .zip(&layers)
                .any(|(named, layer)| named != layer.digest())
        {
            return Err(SynthError::InvalidInput(
                "layers do not match manifest".to_string(),
            ));
        }
        Ok(Self {
            manifest,
            config,
            layers,
        })
    }

    pub fn descriptor(&self) -> Descriptor {
        self.manifest.descriptor()
    }

    pub fn digest(&self) -> &Digest {
        self.manifest.digest()
    }

    pub fn media_type(&self) -> &str {
        self.manifest.media_type()
    }

    pub fn manifest_bytes(&self) -> &Bytes {
        self.manifest.data()
    }

    pub fn config(&self) -> &Blob {
        &self.config
    }

    pub fn config_file(&self) -> Result<ConfigFile> {
        serde_json::from_slice(self.config.data()).map_err(|e| {
            SynthError::InvalidInput(format!("invalid image config {}: {e}", self.config.digest()))
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn manifest_blob(&self) -> &Blob {
        &self.manifest
    }
}

#[derive(Debug, Clone)]
pub enum IndexChild {
    Image(Image),
    Index(ImageIndex),
}

impl IndexChild {
    pub fn descriptor(&self) -> Descriptor {
        match self {
            IndexChild::Image(image) => image.descriptor(),
            IndexChild::Index(index) => index.descriptor(),
        }
    }

    pub fn digest(&self) -> &Digest {
        match self {
            IndexChild::Image(image) => image.digest(),
            IndexChild::Index(index) => index.digest(),
        }
    }
}

/// A child manifest plus the platform and annotations its index entry carries.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub child: IndexChild,
    pub template: Option<Descriptor>,
}

#[derive(Debug, Clone)]
pub struct ImageIndex {
    manifest: Blob,
    children: Vec<IndexChild>,
}

impl ImageIndex {
    /// Assemble an index whose entries point at `entries`' children. Platform,
    /// annotations and urls are carried over from each entry's template.
    pub fn build(media_type: Option<&str>, entries: Vec<IndexEntry>) -> Result<Self> {
        let media_type = media_type.unwrap_or(OCI_INDEX).to_string();
        let mut manifests = Vec::with_capacity(entries.len());
        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut descriptor = entry.child.descriptor();
            if let Some(template) = entry.template {
                descriptor.set_platform(template.platform().clone());
                descriptor.set_annotations(template.annotations().clone());
                descriptor.set_urls(template.urls().clone());
            }
            manifests.push(descriptor);
            children.push(entry.child);
        }
        let manifest = ImageIndexBuilder::default()
            .schema_version(2u32)
            .media_type(MediaType::from(media_type.as_str()))
            .manifests(manifests)
            .build()?;
        let manifest = Blob::new(media_type, serde_json::to_vec(&manifest)?);
        Ok(Self { manifest, children })
    }

    /// Wrap index bytes fetched from elsewhere. `children` must be in the
    /// same order as the index's manifest list.
    pub fn from_raw(
        manifest: impl Into<Bytes>,
        media_type: impl Into<String>,
        children: Vec<IndexChild>,
    ) -> Result<Self> {
        let manifest = Blob::new(media_type, manifest);
        let parsed = parse_index_manifest(manifest.data())?;
        let named = parsed
            .manifests()
            .iter()
            .map(descriptor_digest)
            .collect::<Result<Vec<_>>>()?;
        if named.len() != children.len()
            || named
                .iter()
                .zip(&children)
                .any(|(named, child)| named != child.digest())
        {
            return Err(SynthError::InvalidInput(
                "children do not match index".to_string(),
            ));
        }
        Ok(Self { manifest, children })
    }

    pub fn descriptor(&self) -> Descriptor {
        self.manifest.descriptor()
    }

    pub fn digest(&self) -> &Digest {
        self.manifest.digest()
    }

    pub fn media_type(&self) -> &str {
        self.manifest.media_type()
    }

    pub fn manifest_bytes(&self) -> &Bytes {
        self.manifest.data()
    }

    pub fn index_manifest(&self) -> Result<IndexManifest> {
        parse_index_manifest(self.manifest.data())
    }

    pub fn children(&self) -> &[IndexChild] {
        &self.children
    }

    pub(crate) fn manifest_blob(&self) -> &Blob {
        &self.manifest
    }
}

/// The output of a transformation: a single image or an index of them.
#[derive(Debug, Clone)]
pub enum Synthesized {
    Image(Image),
    Index(ImageIndex),
}

impl Synthesized {
    pub fn descriptor(&self) -> Descriptor {
        match self {
            Synthesized::Image(image) => image.descriptor(),
            Synthesized::Index(index) => index.descriptor(),
        }
    }

    pub fn kind(&self) -> ManifestKind {
        match self {
            Synthesized::Image(_) => ManifestKind::Image,
            Synthesized::Index(_) => ManifestKind::Index,
        }
    }
}

impl From<Image> for Synthesized {
    fn from(image: Image) -> Self {
        Synthesized::Image(image)
    }
}

impl From<ImageIndex> for Synthesized {
    fn from(index: ImageIndex) -> Self {
        Synthesized::Index(index)
    }
}

pub fn parse_image_manifest(bytes: &[u8]) -> Result<ImageManifest> {
    serde_json::from_slice(bytes)
        .map_err(|e| SynthError::InvalidInput(format!("invalid image manifest: {e}")))
}

pub fn parse_index_manifest(bytes: &[u8]) -> Result<IndexManifest> {
    serde_json::from_slice(bytes)
        .map_err(|e| SynthError::InvalidInput(format!("invalid index manifest: {e}")))
}

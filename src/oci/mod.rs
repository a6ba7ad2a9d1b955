//! OCI data model: digests, descriptors, manifests, and the in-memory
//! images strategies produce.

pub mod digest;
pub mod image;
pub mod layer;
pub mod model;

pub use digest::Digest;
pub use image::{Blob, Image, ImageIndex, IndexChild, IndexEntry, Layer, Synthesized};
pub use model::{base_config, ConfigFile, Descriptor, ManifestKind, Platform};

//! Anonymous pulls through `oci-distribution`.
//!
//! The client handles the registry token challenge and caches pull tokens
//! itself. This module only maps references in and errors out.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciEnvelope};
use oci_distribution::manifest::{OciDescriptor, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};

use super::{FetchedManifest, Upstream, UpstreamReference};
use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::oci::model::{ManifestKind, ACCEPTED_MANIFEST_TYPES};
use crate::reference::Identifier;
use crate::types::Result;

const BAD_GATEWAY: u16 = 502;

pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    pub fn new(plain_http: bool) -> Self {
        let protocol = if plain_http {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        Self { client }
    }
}

fn oci_reference(reference: &UpstreamReference) -> Reference {
    let registry = reference.registry.clone();
    let repository = reference.repository.clone();
    match &reference.identifier {
        Identifier::Tag(tag) => Reference::with_tag(registry, repository, tag.clone()),
        Identifier::Digest(digest) => {
            Reference::with_digest(registry, repository, digest.to_string())
        }
    }
}

/// Registry error codes in the wire spelling (`MANIFEST_UNKNOWN`).
fn wire_code(code: &impl std::fmt::Debug) -> String {
    let name = format!("{code:?}");
    let mut wire = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            wire.push('_');
        }
        wire.push(ch.to_ascii_uppercase());
    }
    wire
}

fn status_for(code: &str) -> u16 {
    match code {
        "MANIFEST_UNKNOWN" | "NAME_UNKNOWN" | "BLOB_UNKNOWN" => 404,
        "UNAUTHORIZED" => 401,
        "DENIED" => 403,
        "TOOMANYREQUESTS" => 429,
        _ => 400,
    }
}

fn registry_error(envelope: &OciEnvelope, what: &str) -> SynthError {
    let errors: Vec<serde_json::Value> = envelope
        .errors
        .iter()
        .map(|e| serde_json::json!({ "code": wire_code(&e.code), "message": e.message }))
        .collect();
    let status = errors
        .first()
        .and_then(|e| e["code"].as_str())
        .map(status_for)
        .unwrap_or(400);
    if status == 404 {
        return SynthError::NotFound(what.to_string());
    }
    SynthError::Upstream {
        status,
        body: serde_json::json!({ "errors": errors }).to_string(),
    }
}

fn upstream_error(err: OciDistributionError, what: &str) -> SynthError {
    match err {
        OciDistributionError::RegistryError { envelope, .. } => registry_error(&envelope, what),
        OciDistributionError::ServerError { code: 404, .. } => {
            SynthError::NotFound(what.to_string())
        }
        OciDistributionError::ServerError { code, message, .. } => SynthError::Upstream {
            status: code,
            body: message,
        },
        OciDistributionError::UnauthorizedError { url } => SynthError::Upstream {
            status: 401,
            body: format!("unauthorized: {url}"),
        },
        other => SynthError::Upstream {
            status: BAD_GATEWAY,
            body: format!("upstream request failed: {other}"),
        },
    }
}

/// The media type a manifest document declares, or the default for its
/// shape when it declares none.
fn declared_media_type(bytes: &[u8]) -> Result<String> {
    let manifest: OciManifest = serde_json::from_slice(bytes)
        .map_err(|e| SynthError::UnsupportedMediaType(format!("unrecognized manifest: {e}")))?;
    let (declared, kind) = match manifest {
        OciManifest::Image(image) => (image.media_type, ManifestKind::Image),
        OciManifest::ImageIndex(index) => (index.media_type, ManifestKind::Index),
    };
    Ok(declared.unwrap_or_else(|| kind.default_media_type().to_string()))
}

#[async_trait]
impl Upstream for RegistryClient {
    async fn manifest(&self, reference: &UpstreamReference) -> Result<FetchedManifest> {
        let what = reference.to_string();
        let (raw, _) = self
            .client
            .pull_manifest_raw(
                &oci_reference(reference),
                &RegistryAuth::Anonymous,
                ACCEPTED_MANIFEST_TYPES,
            )
            .await
            .map_err(|e| upstream_error(e, &what))?;

        let bytes = Bytes::from(raw);
        let digest = Digest::sha256(&bytes);
        if let Some(expected) = reference.identifier.as_digest() {
            if *expected != digest {
                return Err(SynthError::TransformationFailed(format!(
                    "manifest for {reference} has digest {digest}"
                )));
            }
        }
        let media_type = declared_media_type(&bytes)?;
        debug!("fetched manifest {reference} ({media_type}, {digest})");
        Ok(FetchedManifest {
            media_type,
            digest,
            bytes,
        })
    }

    async fn blob(&self, reference: &UpstreamReference, digest: &Digest) -> Result<Bytes> {
        let what = format!("blob {digest}");
        let target = reference.with_digest(digest.clone());
        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_reference(&target), &descriptor, &mut data)
            .await
            .map_err(|e| upstream_error(e, &what))?;
        if !digest.matches(&data) {
            return Err(SynthError::TransformationFailed(format!(
                "blob {digest} from {} failed verification",
                reference.registry
            )));
        }
        Ok(Bytes::from(data))
    }
}

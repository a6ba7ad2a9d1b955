//! Registry API path grammar.
//!
//! `/v2/<repository>/(manifests|blobs)/<reference>` is split from the tail:
//! the last two segments are always the endpoint and the reference, so
//! repository names may contain any number of slashes.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::types::Result;

const MANIFESTS: &str = "manifests";
const BLOBS: &str = "blobs";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Tag(String),
    Digest(Digest),
}

impl Identifier {
    /// Anything shaped like `algorithm:encoded` is a digest; it is an error
    /// for it to be malformed rather than a tag.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains(':') {
            return Digest::parse(raw)
                .map(Identifier::Digest)
                .ok_or_else(|| SynthError::InvalidReference(format!("invalid digest '{raw}'")));
        }
        if !tag_pattern().is_match(raw) {
            return Err(SynthError::InvalidReference(format!("invalid tag '{raw}'")));
        }
        Ok(Identifier::Tag(raw.to_string()))
    }

    pub fn as_digest(&self) -> Option<&Digest> {
        match self {
            Identifier::Digest(digest) => Some(digest),
            Identifier::Tag(_) => None,
        }
    }

    pub fn as_tag(&self) -> Option<&str> {
        match self {
            Identifier::Tag(tag) => Some(tag),
            Identifier::Digest(_) => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Tag(tag) => f.write_str(tag),
            Identifier::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub repository: String,
    pub identifier: Identifier,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, identifier: Identifier) -> Self {
        Self {
            repository: repository.into(),
            identifier,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.identifier.as_tag()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.identifier.as_digest()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Tag(tag) => write!(f, "{}:{tag}", self.repository),
            Identifier::Digest(digest) => write!(f, "{}@{digest}", self.repository),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryRequest {
    VersionCheck,
    Manifest(ImageReference),
    Blob(ImageReference),
}

/// Parse a request path such as `/v2/library/ubuntu/manifests/latest`.
/// The leading `/v2` is optional so router catch-all captures parse too.
pub fn parse_registry_path(path: &str) -> Result<RegistryRequest> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = match trimmed.strip_prefix("v2") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => trimmed,
    };
    let trimmed = trimmed.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(RegistryRequest::VersionCheck);
    }

    let components: Vec<&str> = trimmed.split('/').collect();
    if components.len() < 3 {
        return Err(SynthError::InvalidReference(format!(
            "'{trimmed}' is not a manifest or blob path"
        )));
    }
    let reference = components[components.len() - 1];
    let endpoint = components[components.len() - 2];
    let repository = &components[..components.len() - 2];
    validate_repository(repository)?;
    let repository = repository.join("/");

    match endpoint {
        MANIFESTS => Ok(RegistryRequest::Manifest(ImageReference::new(
            repository,
            Identifier::parse(reference)?,
        ))),
        BLOBS => Ok(RegistryRequest::Blob(ImageReference::new(
            repository,
            Identifier::parse(reference)?,
        ))),
        other => Err(SynthError::InvalidReference(format!(
            "unknown endpoint '{other}'"
        ))),
    }
}

/// Drop leading copies of the service's own host from a repository path, so
/// `flatten.example.com/flatten.example.com/ubuntu` resolves to `ubuntu`.
pub fn strip_host_prefix<'a>(repository: &'a str, host: &str) -> &'a str {
    let host = host.trim_end_matches('/');
    if host.is_empty() {
        return repository;
    }
    let mut rest = repository;
    while let Some(stripped) = rest.strip_prefix(host).and_then(|r| r.strip_prefix('/')) {
        rest = stripped;
    }
    rest
}

fn validate_repository(components: &[&str]) -> Result<()> {
    for (index, component) in components.iter().enumerate() {
        let valid = component_pattern().is_match(component)
            || (index == 0 && components.len() > 1 && host_pattern().is_match(component));
        if !valid {
            return Err(SynthError::InvalidReference(format!(
                "invalid repository component '{component}'"
            )));
        }
    }
    Ok(())
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("tag regex"))
}

fn component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("component regex")
    })
}

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?$").expect("host regex")
    })
}

use std::fmt;

use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::reference::Identifier;
use crate::types::Result;

pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";

/// An image on some upstream registry, after Docker-style name expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamReference {
    pub registry: String,
    pub repository: String,
    pub identifier: Identifier,
}

impl UpstreamReference {
    /// Expand a repository path the way `docker pull` does: a first component
    /// that looks like a host (`.` or `:` in it, or `localhost`) names the
    /// registry; anything else lives on `default_registry`, and bare names on
    /// Docker Hub get the `library/` namespace.
    pub fn normalize(path: &str, identifier: Identifier, default_registry: &str) -> Result<Self> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(SynthError::InvalidReference(
                "empty repository name".to_string(),
            ));
        }
        let (registry, repository) = match path.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first, rest),
            _ => (default_registry, path),
        };
        if repository.is_empty() {
            return Err(SynthError::InvalidReference(format!(
                "'{path}' names a registry but no repository"
            )));
        }

        let registry = match registry {
            "docker.io" | "index.docker.io" => DOCKER_HUB_REGISTRY,
            other => other,
        };
        let repository = if registry == DOCKER_HUB_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository.to_string()
        };

        Ok(Self {
            registry: registry.to_string(),
            repository,
            identifier,
        })
    }

    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            identifier: Identifier::Digest(digest),
        }
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl fmt::Display for UpstreamReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Tag(tag) => write!(f, "{}/{}:{tag}", self.registry, self.repository),
            Identifier::Digest(digest) => {
                write!(f, "{}/{}@{digest}", self.registry, self.repository)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> Identifier {
        Identifier::Tag(name.to_string())
    }

    #[test]
    fn bare_names_go_to_docker_hub_library() {
        let reference =
            UpstreamReference::normalize("ubuntu", tag("latest"), DOCKER_HUB_REGISTRY).unwrap();
        assert_eq!(reference.registry, DOCKER_HUB_REGISTRY);
        assert_eq!(reference.repository, "library/ubuntu");
        assert_eq!(reference.to_string(), "registry-1.docker.io/library/ubuntu:latest");
    }

    #[test]
    fn namespaced_names_keep_their_namespace() {
        let reference =
            UpstreamReference::normalize("grafana/loki", tag("2.9"), DOCKER_HUB_REGISTRY).unwrap();
        assert_eq!(reference.repository, "grafana/loki");
    }

    #[test]
    fn host_components_select_the_registry() {
        let normalize = |path: &str, name: &str| {
            UpstreamReference::normalize(path, tag(name), DOCKER_HUB_REGISTRY).unwrap()
        };
        let gcr = normalize("gcr.io/distroless/static", "nonroot");
        assert_eq!(gcr.registry, "gcr.io");
        assert_eq!(gcr.repository, "distroless/static");

        let local = normalize("localhost/app", "dev");
        assert_eq!(local.registry, "localhost");

        let port = normalize("127.0.0.1:5000/app", "dev");
        assert_eq!(port.registry, "127.0.0.1:5000");
        assert_eq!(port.repository, "app");
    }

    #[test]
    fn docker_io_aliases_normalize() {
        let mirror = "mirror.example.com";
        let reference = UpstreamReference::normalize("docker.io/alpine", tag("3"), mirror).unwrap();
        assert_eq!(reference.registry, DOCKER_HUB_REGISTRY);
        assert_eq!(reference.repository, "library/alpine");
    }

    #[test]
    fn non_hub_defaults_do_not_add_library() {
        let reference = UpstreamReference::normalize("alpine", tag("3"), "127.0.0.1:5000").unwrap();
        assert_eq!(reference.registry, "127.0.0.1:5000");
        assert_eq!(reference.repository, "alpine");
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(UpstreamReference::normalize("", tag("x"), DOCKER_HUB_REGISTRY).is_err());
        assert!(UpstreamReference::normalize("/", tag("x"), DOCKER_HUB_REGISTRY).is_err());
    }
}

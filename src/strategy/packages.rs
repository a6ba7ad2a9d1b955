//! Images assembled from a package list, apko style: `/v2/busybox/curl/manifests/latest`
//! is an image with `busybox` and `curl` installed.
//!
//! The install itself is delegated to a [`PackageBuilder`]. The bundled
//! [`CommandBuilder`] runs an operator-supplied shell command that writes a
//! gzip layer tarball.

use async_trait::async_trait;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use super::{unknown_digest, Resolved, Strategy};
use crate::cache_key::{derive_key, KeyMaterial};
use crate::error::SynthError;
use crate::oci::image::{Image, Layer, Synthesized};
use crate::oci::layer::layer_from_gzip;
use crate::oci::model::{base_config, ContainerConfigBuilder, HistoryBuilder};
use crate::reference::{strip_host_prefix, Identifier, ImageReference};
use crate::types::Result;

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const LAYER_OUTPUT_ENV: &str = "KONTAIN_LAYER_OUTPUT";
const AUTHOR: &str = "kontain";

#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Produce one layer with `packages` installed. The list is sorted and
    /// free of duplicates.
    async fn build(&self, packages: &[String]) -> Result<Layer>;
}

/// Runs `sh -c <command> kontain-build <packages...>` and reads the layer
/// from the path in `$KONTAIN_LAYER_OUTPUT`.
pub struct CommandBuilder {
    command: String,
    timeout: Duration,
}

impl CommandBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PackageBuilder for CommandBuilder {
    async fn build(&self, packages: &[String]) -> Result<Layer> {
        let workdir = tempfile::tempdir()?;
        let output: PathBuf = workdir.path().join("layer.tar.gz");
        debug!("building layer for {}", packages.join(" "));

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .arg("kontain-build")
            .args(packages)
            .env(LAYER_OUTPUT_ENV, &output)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                SynthError::TransformationFailed(format!(
                    "package build timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!("package build failed: {}", stderr.trim());
            return Err(SynthError::TransformationFailed(format!(
                "package build exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        let compressed = tokio::fs::read(&output).await.map_err(|e| {
            let path = output.display();
            SynthError::TransformationFailed(format!("build produced no layer at {path}: {e}"))
        })?;
        layer_from_gzip(compressed)
    }
}

pub struct PackagesStrategy {
    builder: Arc<dyn PackageBuilder>,
    self_host: Option<String>,
}

impl PackagesStrategy {
    pub fn new(builder: Arc<dyn PackageBuilder>, self_host: Option<String>) -> Self {
        Self { builder, self_host }
    }
}

#[async_trait]
impl Strategy for PackagesStrategy {
    type Input = Vec<String>;

    fn name(&self) -> &'static str {
        "packages"
    }

    async fn resolve(&self, reference: &ImageReference) -> Result<Resolved<Vec<String>>> {
        if matches!(reference.identifier, Identifier::Digest(_)) {
            return Err(unknown_digest(reference));
        }
        let path = match &self.self_host {
            Some(host) => strip_host_prefix(&reference.repository, host),
            None => reference.repository.as_str(),
        };
        let packages: Vec<String> = path
            .split('/')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if packages.is_empty() {
            return Err(SynthError::InvalidInput("no packages requested".to_string()));
        }
        let key = derive_key(self.name(), &KeyMaterial::new().set("packages", &packages));
        Ok(Resolved::new(key, packages))
    }

    async fn transform(&self, resolved: &Resolved<Vec<String>>) -> Result<Synthesized> {
        let layer = self.builder.build(&resolved.input).await?;
        let mut config = base_config("amd64", "linux")?;
        config.set_author(Some(AUTHOR.to_string()));
        config.set_config(Some(
            ContainerConfigBuilder::default()
                .entrypoint(vec!["/bin/sh".to_string(), "-l".to_string()])
                .build()?,
        ));
        config.set_history(vec![HistoryBuilder::default()
            .author(AUTHOR)
            .created_by(format!("apk add {}", resolved.input.join(" ")))
            .build()?]);
        Ok(Image::build(config, vec![layer])?.into())
    }
}

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::store::gcs::DEFAULT_ENDPOINT;
use crate::strategy::random::DEFAULT_MAX_BYTES;
use crate::upstream::reference::DOCKER_HUB_REGISTRY;

const CONFIG_DIR_NAME: &str = ".kontain";
const CONFIG_FILE_NAME: &str = "config.json";

pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Fs,
    Gcs,
}

impl StoreKind {
    /// Memory and filesystem stores have no public endpoint, so the service
    /// serves their objects itself.
    pub fn served_locally(&self) -> bool {
        !matches!(self, StoreKind::Gcs)
    }
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "fs" => Ok(StoreKind::Fs),
            "gcs" => Ok(StoreKind::Gcs),
            other => Err(anyhow!("unknown store '{other}' (expected memory, fs or gcs)")),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Memory => "memory",
            StoreKind::Fs => "fs",
            StoreKind::Gcs => "gcs",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    pub store_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_token: Option<String>,
    pub upstream_registry: String,
    pub upstream_plain_http: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    pub max_random_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            bucket: None,
            store_dir: None,
            store_endpoint: DEFAULT_ENDPOINT.to_string(),
            public_url: None,
            store_token: None,
            upstream_registry: DOCKER_HUB_REGISTRY.to_string(),
            upstream_plain_http: false,
            self_host: None,
            build_command: None,
            max_random_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl Config {
    /// Settings from `~/.kontain/config.json` when present, overridden by
    /// `KONTAIN_*` environment variables.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(env_var)?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(store) = lookup("KONTAIN_STORE") {
            self.store = store.parse()?;
        }
        if let Some(bucket) = lookup("KONTAIN_BUCKET") {
            self.bucket = Some(bucket);
        }
        if let Some(dir) = lookup("KONTAIN_STORE_DIR") {
            self.store_dir = Some(PathBuf::from(dir));
        }
        if let Some(endpoint) = lookup("KONTAIN_STORE_ENDPOINT") {
            self.store_endpoint = endpoint;
        }
        if let Some(url) = lookup("KONTAIN_PUBLIC_URL") {
            self.public_url = Some(url);
        }
        if let Some(token) = lookup("KONTAIN_STORE_TOKEN") {
            self.store_token = Some(token);
        }
        if let Some(registry) = lookup("KONTAIN_UPSTREAM_REGISTRY") {
            self.upstream_registry = registry;
        }
        if let Some(plain) = lookup("KONTAIN_UPSTREAM_PLAIN_HTTP") {
            self.upstream_plain_http = parse_flag(&plain)
                .with_context(|| format!("Invalid KONTAIN_UPSTREAM_PLAIN_HTTP '{plain}'"))?;
        }
        if let Some(host) = lookup("KONTAIN_SELF_HOST") {
            self.self_host = Some(host);
        }
        if let Some(command) = lookup("KONTAIN_BUILD_COMMAND") {
            self.build_command = Some(command);
        }
        if let Some(max) = lookup("KONTAIN_MAX_RANDOM_BYTES") {
            self.max_random_bytes = max
                .trim()
                .parse()
                .with_context(|| format!("Invalid KONTAIN_MAX_RANDOM_BYTES '{max}'"))?;
        }
        Ok(())
    }

    /// Base URL redirects point at. Locally served stores default to this
    /// service's own address.
    pub fn resolved_public_url(&self, host: &str, port: u16) -> Option<String> {
        if let Some(url) = &self.public_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        if self.store.served_locally() {
            Some(format!("http://{host}:{port}"))
        } else {
            None
        }
    }

    pub fn home_dir() -> Result<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir().context(
            "Could not determine home directory. Please ensure HOME environment variable is set.",
        )
    }

    fn config_path() -> Result<PathBuf> {
        let home_dir = Self::home_dir()?;
        Ok(home_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("expected true or false")),
    }
}

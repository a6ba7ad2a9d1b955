//! Deferred synthesis: the first request for `name:<duration>` answers
//! "try again later" and schedules the image to appear after the duration.
//!
//! While a job is pending, a placeholder object `placeholder-<key>` records
//! when it was scheduled. The job materializes a small random image under
//! the cache key and then removes the placeholder. A placeholder still
//! present [`PLACEHOLDER_GRACE`] after its `ready_at` belongs to a lost or
//! failed job and is replaced by a fresh schedule.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use log::{error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::random::{random_image, RandomSpec};
use super::{unknown_digest, Resolved, Strategy};
use crate::cache_key::{derive_key, KeyMaterial};
use crate::error::SynthError;
use crate::materialize::Materializer;
use crate::oci::digest::Digest;
use crate::oci::image::Synthesized;
use crate::reference::{Identifier, ImageReference};
use crate::store::{ContentStore, ObjectMeta, WriteOutcome};
use crate::types::Result;

pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);
pub const MAX_WAIT: Duration = Duration::from_secs(60 * 60);
pub const PLACEHOLDER_MEDIA_TYPE: &str = "application/vnd.kontain.placeholder.v1+json";
pub const WAITING_MESSAGE: &str = "waiting for image...";
pub const PLACEHOLDER_GRACE: Duration = Duration::from_secs(30);

const GENERATED: RandomSpec = RandomSpec {
    layers: 10,
    layer_size: 100,
};

/// A unit of deferred work.
pub type Job = BoxFuture<'static, ()>;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Run `job` no sooner than `delay` from now.
    async fn enqueue(&self, delay: Duration, job: Job) -> Result<()>;
}

/// Runs jobs on the current tokio runtime after sleeping out the delay.
#[derive(Debug, Clone, Default)]
pub struct InProcessQueue;

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, delay: Duration, job: Job) -> Result<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderEntry {
    pub created_at: DateTime<Utc>,
    pub ready_at: DateTime<Utc>,
}

impl PlaceholderEntry {
    pub fn new(now: DateTime<Utc>, wait: Duration) -> Self {
        Self {
            created_at: now,
            ready_at: now + chrono::Duration::milliseconds(wait.as_millis() as i64),
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.ready_at + chrono::Duration::milliseconds(PLACEHOLDER_GRACE.as_millis() as i64)
    }
}

pub fn placeholder_key(key: &str) -> String {
    format!("placeholder-{key}")
}

pub struct WaitStrategy {
    materializer: Materializer,
    queue: Arc<dyn TaskQueue>,
}

impl WaitStrategy {
    pub fn new(materializer: Materializer, queue: Arc<dyn TaskQueue>) -> Self {
        Self { materializer, queue }
    }

    fn store(&self) -> &Arc<dyn ContentStore> {
        self.materializer.store()
    }
}

#[async_trait]
impl Strategy for WaitStrategy {
    type Input = Duration;

    fn name(&self) -> &'static str {
        "wait"
    }

    async fn resolve(&self, reference: &ImageReference) -> Result<Resolved<Duration>> {
        let Identifier::Tag(tag) = &reference.identifier else {
            return Err(unknown_digest(reference));
        };
        let wait = if tag == "latest" {
            DEFAULT_WAIT
        } else {
            parse_duration(tag)?
        };
        if wait > MAX_WAIT {
            return Err(SynthError::InvalidInput(format!(
                "duration {} is too long (max {})",
                format_duration(wait),
                format_duration(MAX_WAIT)
            )));
        }
        let key = derive_key(
            self.name(),
            &KeyMaterial::new()
                .field("repository", &reference.repository)
                .field("wait_ms", wait.as_millis().to_string()),
        );
        Ok(Resolved::new(key, wait))
    }

    async fn transform(&self, resolved: &Resolved<Duration>) -> Result<Synthesized> {
        let placeholder = placeholder_key(&resolved.key);
        if let Some((_, raw)) = self.store().read(&placeholder).await? {
            let entry: PlaceholderEntry = serde_json::from_slice(&raw)?;
            if !entry.is_stale(Utc::now()) {
                return Err(SynthError::Pending(WAITING_MESSAGE.to_string()));
            }
            warn!(
                "{} was due at {} and never appeared; rescheduling",
                resolved.key, entry.ready_at
            );
            self.store().delete(&placeholder).await?;
        }

        let wait = resolved.input;
        let content = Bytes::from(serde_json::to_vec(&PlaceholderEntry::new(Utc::now(), wait))?);
        let meta = ObjectMeta::new(Digest::sha256(&content), PLACEHOLDER_MEDIA_TYPE);
        if self.store().write(&placeholder, content, &meta).await? == WriteOutcome::AlreadyExists {
            return Err(SynthError::Pending(WAITING_MESSAGE.to_string()));
        }

        let materializer = self.materializer.clone();
        let job = generate_job(materializer, resolved.key.clone(), placeholder.clone());
        if let Err(e) = self.queue.enqueue(wait, job).await {
            if let Err(cleanup) = self.store().delete(&placeholder).await {
                error!("failed to remove {placeholder}: {cleanup}");
            }
            return Err(e);
        }
        info!("scheduled {} in {}", resolved.key, format_duration(wait));
        Err(SynthError::Pending(format!(
            "enqueued task to generate image in {}",
            format_duration(wait)
        )))
    }
}

/// Generate the image, then drop the placeholder whether or not that
/// worked so the next request can schedule again.
fn generate_job(materializer: Materializer, key: String, placeholder: String) -> Job {
    Box::pin(async move {
        let generated = async {
            let image = random_image(GENERATED)?;
            materializer.persist_image(&image, &[key.clone()]).await
        }
        .await;
        match generated {
            Ok(_) => info!("generated {key}"),
            Err(e) => error!("failed to generate {key}: {e}"),
        }
        if let Err(e) = materializer.store().delete(&placeholder).await {
            error!("failed to remove {placeholder}: {e}");
        }
    })
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9]+(?:\.[0-9]+)?)(ns|us|ms|s|m|h)").expect("duration regex")
    })
}

/// Parse durations written like `5s`, `1m30s`, `250ms` or `1.5h`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let invalid = || SynthError::InvalidInput(format!("invalid duration '{raw}'"));
    let mut total = 0f64;
    let mut consumed = 0;
    for captures in duration_pattern().captures_iter(raw) {
        let (Some(whole), Some(value), Some(unit)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            return Err(invalid());
        };
        if whole.start() != consumed {
            return Err(invalid());
        }
        consumed = whole.end();
        let value: f64 = value.as_str().parse().map_err(|_| invalid())?;
        let seconds = match unit.as_str() {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        total += value * seconds;
    }
    if consumed == 0 || consumed != raw.len() {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let sub_millis = millis % 1000;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if sub_millis > 0 {
        out.push_str(&format!("{seconds}.{sub_millis:03}s"));
    } else {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

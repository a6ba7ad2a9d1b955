//! Object storage through the Google Cloud Storage XML API.
//!
//! Creation is conditional on `x-goog-if-generation-match: 0`, so the bucket
//! itself arbitrates concurrent writers: a 412 means another request already
//! created the object.

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use super::{
    join_url, object_path, validate_key, ContentStore, ObjectMeta, StoredObject, WriteOutcome,
};
use crate::error::SynthError;
use crate::oci::digest::Digest;
use crate::types::Result;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const GENERATION_MATCH: &str = "x-goog-if-generation-match";
const DIGEST_META: &str = "x-goog-meta-docker-content-digest";
const STORED_LENGTH: &str = "x-goog-stored-content-length";

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub struct GcsStore {
    client: Client,
    endpoint: String,
    public_url: String,
    bucket: String,
    token: Option<String>,
}

impl GcsStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        public_url: Option<String>,
        token: Option<String>,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(300))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            public_url: public_url.unwrap_or_else(|| endpoint.clone()),
            endpoint,
            bucket: bucket.into(),
            token,
        })
    }

    fn object_url(&self, base: &str, key: &str) -> String {
        join_url(base, &format!("{}/{}", self.bucket, object_path(key)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn unexpected(response: Response, action: &str, key: &str) -> SynthError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SynthError::StoreUnavailable(format!("{action} {key} returned {status}: {body}"))
    }

    fn object_from_headers(response: &Response, key: &str) -> Result<StoredObject> {
        let headers = response.headers();
        let digest = header_text(headers, DIGEST_META)
            .and_then(Digest::parse)
            .ok_or_else(|| {
                SynthError::StoreUnavailable(format!("object {key} has no content digest metadata"))
            })?;
        let media_type = header_text(headers, CONTENT_TYPE.as_str())
            .unwrap_or("application/octet-stream")
            .to_string();
        let size = header_text(headers, STORED_LENGTH)
            .or_else(|| header_text(headers, CONTENT_LENGTH.as_str()))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(StoredObject {
            digest,
            media_type,
            size,
        })
    }
}

#[async_trait]
impl ContentStore for GcsStore {
    async fn exists(&self, key: &str) -> Result<Option<StoredObject>> {
        validate_key(key)?;
        let url = self.object_url(&self.endpoint, key);
        let response = self.authorized(self.client.head(&url)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(Self::object_from_headers(&response, key)?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(response, "HEAD", key).await),
        }
    }

    async fn write(&self, key: &str, content: Bytes, meta: &ObjectMeta) -> Result<WriteOutcome> {
        validate_key(key)?;
        let url = self.object_url(&self.endpoint, key);
        let response = self
            .authorized(self.client.put(&url))
            .header(GENERATION_MATCH, "0")
            .header(CONTENT_TYPE, &meta.media_type)
            .header(DIGEST_META, meta.digest.to_string())
            .body(content)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                debug!("created gs://{}/{}", self.bucket, object_path(key));
                Ok(WriteOutcome::Written)
            }
            StatusCode::PRECONDITION_FAILED => Ok(WriteOutcome::AlreadyExists),
            _ => Err(Self::unexpected(response, "PUT", key).await),
        }
    }

    fn redirect_url(&self, key: &str) -> String {
        self.object_url(&self.public_url, key)
    }

    async fn read(&self, key: &str) -> Result<Option<(StoredObject, Bytes)>> {
        validate_key(key)?;
        let url = self.object_url(&self.endpoint, key);
        let response = self.authorized(self.client.get(&url)).send().await?;
        match response.status() {
            StatusCode::OK => {
                let object = Self::object_from_headers(&response, key)?;
                let content = response.bytes().await?;
                Ok(Some((
                    StoredObject {
                        size: content.len() as u64,
                        ..object
                    },
                    content,
                )))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(response, "GET", key).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let url = self.object_url(&self.endpoint, key);
        let response = self.authorized(self.client.delete(&url)).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::unexpected(response, "DELETE", key).await),
        }
    }
}

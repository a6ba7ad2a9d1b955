use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{debug, info, warn};

use crate::reference::{parse_registry_path, ImageReference, RegistryRequest};
use crate::serve::error::OciError;
use crate::serve::state::AppState;
use crate::store::StoredObject;
use crate::strategy::Strategy;

const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
const API_VERSION: &str = "registry/2.0";

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), OciError> {
    let header_name = axum::http::header::HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| OciError::internal(format!("Invalid header name {name}: {e}")))?;
    let header_value = axum::http::header::HeaderValue::from_str(value)
        .map_err(|e| OciError::internal(format!("Invalid header value for {name}: {e}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

fn object_headers(object: &StoredObject) -> Result<HeaderMap, OciError> {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "Docker-Content-Digest", &object.digest.to_string())?;
    insert_header(&mut headers, "Content-Type", &object.media_type)?;
    insert_header(&mut headers, API_VERSION_HEADER, API_VERSION)?;
    Ok(headers)
}

pub async fn v2_base() -> impl IntoResponse {
    (StatusCode::OK, [(API_VERSION_HEADER, API_VERSION)], "")
}

pub async fn oci_dispatch<S: Strategy>(
    method: Method,
    State(state): State<AppState<S>>,
    Path(path): Path<String>,
) -> Response {
    let result = handle(&method, &state, &path).await;
    let response = match result {
        Ok(response) => response,
        Err(error) => {
            if error.status().is_server_error() {
                warn!("{method} /v2/{path}: {}", error.message());
            } else {
                debug!("{method} /v2/{path}: {} {}", error.code(), error.message());
            }
            error.into_response()
        }
    };
    info!(
        "{} {method} /v2/{path} {}",
        state.strategy_name(),
        response.status().as_u16()
    );
    response
}

async fn handle<S: Strategy>(
    method: &Method,
    state: &AppState<S>,
    path: &str,
) -> Result<Response, OciError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(OciError::unsupported(format!("{method} is not supported")));
    }

    let request = match parse_registry_path(path) {
        Ok(request) => request,
        Err(e) if is_blob_path(path) => return Err(OciError::digest_invalid(e.to_string())),
        Err(e) => return Err(e.into()),
    };
    match request {
        RegistryRequest::VersionCheck => Ok(v2_base().await.into_response()),
        RegistryRequest::Manifest(reference) => get_manifest(method, state, &reference).await,
        RegistryRequest::Blob(reference) => get_blob(method, state, &reference).await,
    }
}

fn is_blob_path(path: &str) -> bool {
    let mut components = path.trim_matches('/').rsplit('/');
    components.next();
    components.next() == Some("blobs")
}

async fn get_manifest<S: Strategy>(
    method: &Method,
    state: &AppState<S>,
    reference: &ImageReference,
) -> Result<Response, OciError> {
    let store = state.store();

    if let Some(digest) = reference.digest() {
        let key = digest.to_string();
        if let Some(object) = store.exists(&key).await? {
            debug!("{reference} is already stored");
            return stored_response(method, state, &key, &object);
        }
    }

    let resolved = state.strategy.resolve(reference).await?;
    if let Some(object) = store.exists(&resolved.key).await? {
        debug!("cache hit for {reference} at {}", resolved.key);
        return stored_response(method, state, &resolved.key, &object);
    }

    info!("cache miss for {reference}, running {}", state.strategy_name());
    let synthesized = state.strategy.transform(&resolved).await?;
    state
        .materializer
        .persist(&synthesized, std::slice::from_ref(&resolved.key))
        .await?;

    // A concurrent request may have won the alias; serve whatever is stored.
    let object = store
        .exists(&resolved.key)
        .await?
        .ok_or_else(|| {
            OciError::internal(format!("{} missing after materialization", resolved.key))
        })?;
    stored_response(method, state, &resolved.key, &object)
}

async fn get_blob<S: Strategy>(
    method: &Method,
    state: &AppState<S>,
    reference: &ImageReference,
) -> Result<Response, OciError> {
    let Some(digest) = reference.digest() else {
        return Err(OciError::digest_invalid(format!(
            "blobs are addressed by digest, not '{}'",
            reference.identifier
        )));
    };
    let key = digest.to_string();
    let object = state
        .store()
        .exists(&key)
        .await?
        .ok_or_else(|| OciError::blob_unknown(format!("{}@{key}", reference.repository)))?;
    stored_response(method, state, &key, &object)
}

/// HEAD answers with metadata; GET redirects to the object itself.
fn stored_response<S>(
    method: &Method,
    state: &AppState<S>,
    key: &str,
    object: &StoredObject,
) -> Result<Response, OciError> {
    let mut headers = object_headers(object)?;
    if method == Method::HEAD {
        insert_header(&mut headers, "Content-Length", &object.size.to_string())?;
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }
    insert_header(&mut headers, "Location", &state.store().redirect_url(key))?;
    Ok((StatusCode::SEE_OTHER, headers, Body::empty()).into_response())
}

/// Serves object bytes for stores without a public endpoint of their own.
pub async fn local_blob<S: Strategy>(
    method: Method,
    State(state): State<AppState<S>>,
    Path(key): Path<String>,
) -> Response {
    let result = async {
        let (object, bytes) = state
            .store()
            .read(&key)
            .await?
            .ok_or_else(|| OciError::blob_unknown(key.clone()))?;
        let mut headers = object_headers(&object)?;
        insert_header(&mut headers, "Content-Length", &object.size.to_string())?;
        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(bytes)
        };
        Ok::<_, OciError>((StatusCode::OK, headers, body).into_response())
    }
    .await;
    let response = result.unwrap_or_else(IntoResponse::into_response);
    debug!("{method} /blobs/{key} {}", response.status().as_u16());
    response
}

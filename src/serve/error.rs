use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::SynthError;

#[derive(Debug, Serialize, Deserialize)]
struct OciErrorEntry {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OciErrorBody {
    errors: Vec<OciErrorEntry>,
}

/// A registry-protocol error: an HTTP status plus the `{"errors":[...]}` body.
#[derive(Debug)]
pub struct OciError {
    status: StatusCode,
    body: OciErrorBody,
}

impl OciError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: OciErrorBody {
                errors: vec![OciErrorEntry {
                    code: code.to_string(),
                    message: message.into(),
                    detail: None,
                }],
            },
        }
    }

    pub fn manifest_unknown(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN", detail)
    }

    pub fn manifest_invalid(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MANIFEST_INVALID", detail)
    }

    pub fn name_invalid(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "NAME_INVALID", detail)
    }

    pub fn blob_unknown(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "BLOB_UNKNOWN", detail)
    }

    pub fn digest_invalid(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "DIGEST_INVALID", detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", detail)
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "UNSUPPORTED", detail)
    }

    /// The image is being produced out of band; the client should retry.
    pub fn pending(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::ACCEPTED, "MANIFEST_UNKNOWN", detail)
    }

    /// Relay an upstream registry failure. Bodies that already speak the
    /// registry error protocol are passed through untouched.
    pub fn upstream(status: u16, body: &str) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        match serde_json::from_str::<OciErrorBody>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => Self {
                status,
                body: parsed,
            },
            _ => {
                let message = if body.trim().is_empty() {
                    format!("upstream registry returned {}", status.as_u16())
                } else {
                    body.trim().to_string()
                };
                Self::new(status, "UNKNOWN", message)
            }
        }
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn code(&self) -> &str {
        self.body
            .errors
            .first()
            .map(|e| e.code.as_str())
            .unwrap_or("UNKNOWN")
    }

    pub(crate) fn message(&self) -> &str {
        self.body
            .errors
            .first()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown")
    }
}

impl From<SynthError> for OciError {
    fn from(err: SynthError) -> Self {
        match err {
            SynthError::InvalidReference(_) | SynthError::InvalidInput(_) => {
                Self::name_invalid(err.to_string())
            }
            SynthError::NotFound(_) => Self::manifest_unknown(err.to_string()),
            SynthError::UnsupportedMediaType(_) => Self::manifest_invalid(err.to_string()),
            SynthError::TransformationFailed(_) | SynthError::StoreUnavailable(_) => {
                Self::internal(err.to_string())
            }
            SynthError::Upstream { status, body } => Self::upstream(status, &body),
            SynthError::Pending(message) => Self::pending(message),
        }
    }
}

impl IntoResponse for OciError {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.body).unwrap_or_default();
        (self.status, [("Content-Type", "application/json")], body).into_response()
    }
}

use std::fmt;

#[derive(Debug)]
pub enum SynthError {
    InvalidReference(String),
    InvalidInput(String),
    NotFound(String),
    UnsupportedMediaType(String),
    TransformationFailed(String),
    StoreUnavailable(String),
    Upstream { status: u16, body: String },
    Pending(String),
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::InvalidReference(msg) => write!(f, "invalid reference: {msg}"),
            SynthError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            SynthError::NotFound(msg) => write!(f, "not found: {msg}"),
            SynthError::UnsupportedMediaType(media_type) => {
                write!(f, "unsupported media type: {media_type}")
            }
            SynthError::TransformationFailed(msg) => write!(f, "transformation failed: {msg}"),
            SynthError::StoreUnavailable(msg) => write!(f, "content store unavailable: {msg}"),
            SynthError::Upstream { status, body } => {
                if body.is_empty() {
                    write!(f, "upstream registry returned {status}")
                } else {
                    write!(f, "upstream registry returned {status}: {body}")
                }
            }
            SynthError::Pending(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for SynthError {}

impl SynthError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SynthError::NotFound(_))
    }
}

impl From<std::io::Error> for SynthError {
    fn from(err: std::io::Error) -> Self {
        SynthError::TransformationFailed(format!("I/O error: {err}"))
    }
}

impl From<reqwest::Error> for SynthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            SynthError::StoreUnavailable(format!("cannot connect: {err}"))
        } else if err.is_timeout() {
            SynthError::StoreUnavailable(format!("request timed out: {err}"))
        } else {
            SynthError::StoreUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SynthError {
    fn from(err: serde_json::Error) -> Self {
        SynthError::InvalidInput(format!("JSON parsing error: {err}"))
    }
}

impl From<oci_spec::OciSpecError> for SynthError {
    fn from(err: oci_spec::OciSpecError) -> Self {
        SynthError::TransformationFailed(format!("cannot assemble OCI document: {err}"))
    }
}

impl From<anyhow::Error> for SynthError {
    fn from(err: anyhow::Error) -> Self {
        SynthError::TransformationFailed(err.to_string())
    }
}

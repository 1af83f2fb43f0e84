use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failure body returned by the relay, always with HTTP 500.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing imageUrl in request")]
    MissingImage,

    #[error("Invalid request body")]
    InvalidRequest(String),

    #[error("{0} is not configured")]
    MissingConfig(&'static str),

    #[error("{service} API error")]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        body: String,
    },

    #[error("Failed to parse {service} response")]
    Parse {
        service: &'static str,
        reason: String,
        raw: String,
    },
}

impl RelayError {
    pub fn details(&self) -> Option<String> {
        match self {
            RelayError::MissingImage | RelayError::MissingConfig(_) => None,
            RelayError::InvalidRequest(reason) => Some(reason.clone()),
            RelayError::Upstream { status, body, .. } => Some(match status {
                Some(code) => format!("status {}: {}", code, body),
                None => body.clone(),
            }),
            RelayError::Parse { reason, .. } => Some(reason.clone()),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            details: self.details(),
        }
    }

    pub(crate) fn transport(service: &'static str, err: reqwest::Error) -> Self {
        RelayError::Upstream {
            service,
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to fetch frame from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("frame source {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("frame from {origin} is not a recognizable image")]
    NotAnImage { origin: String },

    #[error("failed to read frame {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame source has no images configured")]
    Empty,
}

/// Why a dispatch cycle was abandoned.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("frame acquisition failed: {0}")]
    Acquire(#[from] FrameError),

    #[error("analysis failed: {0}")]
    Analyze(#[from] RelayError),
}

impl DispatchError {
    /// Short text suitable for a user notice.
    pub fn notice(&self) -> String {
        match self {
            DispatchError::Acquire(e) => format!("Frame unavailable: {}", e),
            DispatchError::Analyze(e) => match e.details() {
                Some(details) => format!("Analysis failed: {} ({})", e, details),
                None => format!("Analysis failed: {}", e),
            },
        }
    }
}

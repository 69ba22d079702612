//! Error types for the mediscript library.
//!
//! Two families of error reflect two distinct failure modes:
//!
//! * [`MediscriptError`] — **Fatal**: the run cannot proceed at all (missing
//!   file, undecodable image, no inference credential, bad configuration).
//!   Returned as `Err(MediscriptError)` from [`crate::extract::run`] and the
//!   extractor constructor.
//!
//! * [`ExtractionFailure`] — **Non-fatal**: the image was enhanced and sent,
//!   but no record came back (service failure or an unparseable response).
//!   Stored inside [`crate::output::ExtractionReport`] so callers always get
//!   the same shape: a record, or nothing plus a diagnostic payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mediscript library.
#[derive(Debug, Error)]
pub enum MediscriptError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are neither JPEG nor PNG.
    #[error("'{source_name}' is not a JPEG or PNG image\nFirst bytes: {magic:?}")]
    UnsupportedImage { source_name: String, magic: Vec<u8> },

    /// The image header looked right but the body could not be decoded.
    #[error("Failed to decode image '{source_name}': {detail}")]
    ImageDecodeFailed { source_name: String, detail: String },

    // ── Inference errors ──────────────────────────────────────────────────
    /// No inference client could be built (missing API key etc.).
    #[error("Inference provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// JSON or CSV serialisation of a record failed.
    #[error("Export failed: {0}")]
    ExportFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an inference-service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFailureKind {
    /// The request did not complete within `api_timeout_secs`.
    Timeout,
    /// The service rejected the credential (401/403).
    Authentication,
    /// The service throttled the request (429).
    RateLimited,
    /// Connection-level failure before a response arrived.
    Network,
    /// A response arrived but carried no usable text.
    MalformedResponse,
    /// Anything the classifier could not place.
    Other,
}

impl fmt::Display for ServiceFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Authentication => "authentication rejected",
            Self::RateLimited => "rate limited",
            Self::Network => "network error",
            Self::MalformedResponse => "malformed response",
            Self::Other => "service error",
        };
        f.write_str(s)
    }
}

/// Error returned by a [`crate::pipeline::llm::VisionClient`].
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ServiceFailureKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a provider error message by the status codes and phrases
    /// providers put in their error text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("timed out") || lower.contains("timeout") {
            ServiceFailureKind::Timeout
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("permission denied")
        {
            ServiceFailureKind::Authentication
        } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
            ServiceFailureKind::RateLimited
        } else if lower.contains("connect")
            || lower.contains("dns")
            || lower.contains("network")
        {
            ServiceFailureKind::Network
        } else if lower.contains("deserial")
            || lower.contains("invalid response")
            || lower.contains("unexpected response")
        {
            ServiceFailureKind::MalformedResponse
        } else {
            ServiceFailureKind::Other
        };
        Self { kind, message }
    }
}

/// The response text could not be decoded into a record.
///
/// `raw` is the exact text the service returned, kept for diagnostic display.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("Failed to parse JSON response: {reason}")]
pub struct ParseFailure {
    pub raw: String,
    pub reason: String,
}

/// A non-fatal "no data extracted" outcome.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum ExtractionFailure {
    /// The inference call itself failed; not retried.
    #[error("Error analyzing prescription ({kind}): {detail}")]
    Service {
        kind: ServiceFailureKind,
        detail: String,
    },

    /// The service answered but the text held no decodable record.
    #[error(transparent)]
    Parse(ParseFailure),
}

impl ExtractionFailure {
    /// The raw model output, when there was one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::Parse(p) => Some(&p.raw),
            Self::Service { .. } => None,
        }
    }
}

impl From<ServiceError> for ExtractionFailure {
    fn from(e: ServiceError) -> Self {
        Self::Service {
            kind: e.kind,
            detail: e.message,
        }
    }
}

impl From<ParseFailure> for ExtractionFailure {
    fn from(p: ParseFailure) -> Self {
        Self::Parse(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_error() {
        let e = ServiceError::classify("HTTP 401 Unauthorized: invalid API key");
        assert_eq!(e.kind, ServiceFailureKind::Authentication);
    }

    #[test]
    fn classify_rate_limit() {
        let e = ServiceError::classify("status 429: Rate limit exceeded");
        assert_eq!(e.kind, ServiceFailureKind::RateLimited);
    }

    #[test]
    fn classify_timeout() {
        let e = ServiceError::classify("request timed out");
        assert_eq!(e.kind, ServiceFailureKind::Timeout);
    }

    #[test]
    fn classify_unknown() {
        let e = ServiceError::classify("the model refused");
        assert_eq!(e.kind, ServiceFailureKind::Other);
    }

    #[test]
    fn parse_failure_keeps_raw_text() {
        let f: ExtractionFailure = ParseFailure {
            raw: "not json at all {{{".into(),
            reason: "expected value".into(),
        }
        .into();
        assert_eq!(f.raw_response(), Some("not json at all {{{"));
        assert!(f.to_string().contains("expected value"));
    }

    #[test]
    fn service_failure_display() {
        let f: ExtractionFailure =
            ServiceError::new(ServiceFailureKind::Network, "connection reset").into();
        let msg = f.to_string();
        assert!(msg.contains("network error"), "got: {msg}");
        assert!(msg.contains("connection reset"));
        assert!(f.raw_response().is_none());
    }

    #[test]
    fn unsupported_image_display() {
        let e = MediscriptError::UnsupportedImage {
            source_name: "scan.gif".into(),
            magic: b"GIF8".to_vec(),
        };
        assert!(e.to_string().contains("scan.gif"));
    }
}

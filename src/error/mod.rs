//! Error types and handlers for fetch operations

pub mod handlers;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Reference string does not follow `host/repository:tag`
    #[error("Malformed reference {reference:?}: {reason}")]
    MalformedReference { reference: String, reason: String },
    /// Registry listing had no files to download
    #[error("Artifact {0} contains no files")]
    EmptyArtifact(String),
    /// Connection, DNS, TLS, timeout or body stream failures
    #[error("Network error: {0}")]
    Network(String),
    /// Registry answered with an error status
    #[error("Registry error: {0}")]
    Registry(String),
    /// Token exchange or credential rejection
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// Origin answered, but not with something we can use
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    /// Local disk failures
    #[error("Filesystem error during {operation} on {}: {source}", path.display())]
    Filesystem {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Download cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    /// Every candidate failed; only the last attempt's error is kept
    #[error("Fallback failed, last source {last_source}: {error}")]
    MirrorsExhausted {
        last_source: String,
        #[source]
        error: Box<FetchError>,
    },
}

impl FetchError {
    pub fn malformed(reference: &str, reason: impl Into<String>) -> Self {
        FetchError::MalformedReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a failure on one source should move on to the next candidate.
    ///
    /// Local disk problems, bad input and cancellation are independent of the
    /// source, so trying another mirror cannot help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::Registry(_)
                | FetchError::Authentication(_)
                | FetchError::UnexpectedResponse(_)
                | FetchError::DigestMismatch { .. }
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::UnexpectedResponse(format!("JSON decoding failed: {}", err))
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::Configuration(format!("Invalid URL: {}", err))
    }
}

/// Attach the failing operation and path to an `io::Error`
pub trait IoResultExt<T> {
    fn fs_context(self, operation: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn fs_context(self, operation: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| FetchError::Filesystem {
            operation,
            path: path.to_path_buf(),
            source,
        })
    }
}

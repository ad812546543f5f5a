//! Error taxonomy for the ingestion and answering pipelines.
//!
//! Collaborators (embedding providers, generation models, remote stores)
//! report failures as [`ProviderError`], tagged with an [`ErrorKind`].
//! Retry decisions look only at that tag:
//!
//! | Kind | Examples | Treatment |
//! |------|----------|-----------|
//! | `Transient` | HTTP 429, `RESOURCE_EXHAUSTED`, 5xx, timeouts | bounded backoff-retry |
//! | `Fatal` | bad request, auth failure, malformed response | surfaced immediately |
//!
//! Pipeline-level failures are expressed by [`Error`].

use thiserror::Error;

/// Classification of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Quota or rate-limit exhaustion and other conditions worth retrying.
    Transient,
    /// Anything that will fail the same way on retry.
    Fatal,
}

/// A failure reported by an external collaborator.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Pipeline error.
#[derive(Debug, Error)]
pub enum Error {
    /// No passages were produced, or a batch could not be indexed.
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// Quota or rate limit still exhausted after all retries.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The vector store failed during search.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Answer generation failed after all retries.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A collection or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A vector's length differs from the dimension locked for the index.
    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Provider(e) => e.is_transient(),
            Error::QuotaExceeded(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_kind() {
        assert!(ProviderError::transient("429").is_transient());
        assert!(!ProviderError::fatal("400").is_transient());
    }

    #[test]
    fn test_error_transient_classification() {
        let e: Error = ProviderError::transient("rate limited").into();
        assert!(e.is_transient());
        let e: Error = ProviderError::fatal("bad key").into();
        assert!(!e.is_transient());
        assert!(!Error::DimensionMismatch {
            expected: 768,
            actual: 3
        }
        .is_transient());
    }

    #[test]
    fn test_provider_error_display_is_message() {
        let e = Error::Provider(ProviderError::fatal("API error 400: invalid model"));
        assert_eq!(e.to_string(), "API error 400: invalid model");
    }
}

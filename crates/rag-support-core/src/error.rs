//! Error taxonomy shared by the core pipeline and the app crate.
//!
//! "No sufficient context" and "low confidence" are deliberately absent:
//! they are ordinary outcomes ([`Retrieval::NoSufficientContext`] and the
//! confidence marker on responses), not failures.
//!
//! [`Retrieval::NoSufficientContext`]: crate::retrieve::Retrieval::NoSufficientContext

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RagError {
    /// Malformed or out-of-bounds request. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The embedding model or vector store could not serve the call.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms} ms")]
    DownstreamTimeout { operation: String, timeout_ms: u64 },

    /// The generation model failed for a reason other than a timeout.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RagError::Validation(msg.into())
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RagError::IndexUnavailable(_)
                | RagError::DownstreamTimeout { .. }
                | RagError::GenerationUnavailable(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RagError::DownstreamTimeout { .. })
    }

    /// Classify a failed capability call.
    ///
    /// A [`RagError`] already carried inside the `anyhow::Error` (typically a
    /// `DownstreamTimeout` raised by a deadline decorator) is kept as-is;
    /// anything else becomes the error produced by `otherwise`.
    pub fn classify(err: anyhow::Error, otherwise: impl FnOnce(String) -> RagError) -> RagError {
        match err.downcast::<RagError>() {
            Ok(rag) => rag,
            Err(other) => otherwise(format!("{:#}", other)),
        }
    }
}

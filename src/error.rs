//! Error taxonomy shared across the assistant.
//!
//! Every component translates its local failures into one of these coarse
//! kinds at its boundary. The retry policy lives with the kind:
//! - [`PilotError::Auth`] is never retried automatically; the caller must
//!   re-authenticate.
//! - [`PilotError::Transient`] is retried with exponential backoff up to a
//!   bounded attempt count.
//! - [`PilotError::CursorInvalid`] makes the sync engine fall back to a
//!   full backfill.
//! - [`PilotError::StoreUnavailable`] is retried on the ingestion path and
//!   degrades queries to an empty-context answer.
//! - [`PilotError::LlmUnavailable`] allows a single retry before the
//!   orchestrator produces an apologetic degraded answer.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PilotError>;

/// Errors that can occur anywhere in the assistant.
#[derive(Error, Debug)]
pub enum PilotError {
    /// Credentials invalid or expired; requires a re-authentication flow.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rate limit, network failure, or provider hiccup; retryable.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The mail provider reports the sync cursor as expired.
    #[error("sync cursor is no longer valid")]
    CursorInvalid,

    /// The retrieval store cannot be reached.
    #[error("retrieval store unavailable: {0}")]
    StoreUnavailable(String),

    /// The hosted language model cannot be reached or keeps failing.
    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PilotError {
    /// Whether the ingestion path may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PilotError::Transient(_) | PilotError::StoreUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for PilotError {
    fn from(err: sqlx::Error) -> Self {
        PilotError::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for PilotError {
    fn from(err: reqwest::Error) -> Self {
        // Status-code classification happens at each provider; an error
        // surfacing from reqwest itself is a network-level failure.
        PilotError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(PilotError::Transient("429".into()).is_retryable());
        assert!(PilotError::StoreUnavailable("conn".into()).is_retryable());
        assert!(!PilotError::Auth("expired".into()).is_retryable());
        assert!(!PilotError::CursorInvalid.is_retryable());
        assert!(!PilotError::LlmUnavailable("down".into()).is_retryable());
    }
}

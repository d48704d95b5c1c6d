//! Error types for the trialscreen library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScreenError`] — **Fatal**: the protocol pipeline cannot produce an
//!   artifact at all (encrypted or unopenable PDF, completion retries
//!   exhausted on malformed output). Returned as `Err(ScreenError)` from
//!   [`crate::run::run_protocol_pipeline`].
//!
//! * [`CompletionError`] — the tagged classification of a completion-service
//!   failure: retryable or not. The retry helper in [`crate::llm`] consults
//!   this tag instead of special-casing concrete provider error types, so the
//!   "never retry an invalid request" rule stays explicit and portable.
//!
//! Page-level and criterion-level problems are not errors at all: they are
//! absorbed as warning strings on [`crate::model::ParsedDocument`] and
//! [`crate::model::ExtractionMetadata`] and the run continues. The screening
//! flow never returns either type — every failure there degrades to an
//! `Escalate` result, because a screening caller needs a decision, not an
//! exception.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the trialscreen library.
#[derive(Debug, Error)]
pub enum ScreenError {
    /// The PDF is password-protected; no partial output is meaningful.
    #[error("PDF '{path}' is encrypted and cannot be read.\nDecrypt it first, e.g.: qpdf --decrypt input.pdf output.pdf")]
    EncryptedDocument { path: PathBuf },

    /// The PDF is missing, corrupt, or not a PDF at all.
    #[error("Cannot open PDF '{path}': {detail}")]
    UnreadablePdf { path: PathBuf, detail: String },

    /// The completion service kept returning output that could not be parsed
    /// against the extraction schema, even after retries.
    #[error("Criteria extraction failed after {attempts} attempts — completion output was malformed: {detail}")]
    MalformedCompletion { attempts: u32, detail: String },

    /// The completion service rejected the request as invalid. Never retried:
    /// the same input cannot succeed on a second attempt.
    #[error("Completion service rejected the request: {0}")]
    CompletionRejected(String),

    /// Transient completion failures exhausted the retry budget.
    #[error("Completion service unavailable after {attempts} attempts: {detail}")]
    CompletionExhausted { attempts: u32, detail: String },

    /// No completion client could be constructed.
    #[error(
        "No completion client is configured: {0}\n\
         Set OPENAI_API_KEY / ANTHROPIC_API_KEY, or inject a client with \
         ScreenConfig::builder().completion_client(...)"
    )]
    ClientNotConfigured(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error (task panic etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A completion-service failure, tagged by whether a retry can help.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// The request itself is structurally invalid (schema violation, content
    /// rejection, 4xx-class). Retrying the identical request cannot succeed.
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),

    /// Transient failure — timeout, rate limit, overloaded backend. Safe to
    /// retry with backoff.
    #[error("transient completion failure: {0}")]
    Transient(String),
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompletionError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypted_display_names_path() {
        let e = ScreenError::EncryptedDocument {
            path: PathBuf::from("/tmp/protocol.pdf"),
        };
        assert!(e.to_string().contains("protocol.pdf"));
        assert!(e.to_string().contains("encrypted"));
    }

    #[test]
    fn malformed_display_mentions_attempts() {
        let e = ScreenError::MalformedCompletion {
            attempts: 3,
            detail: "expected value at line 1".into(),
        };
        assert!(e.to_string().contains("3 attempts"));
    }

    #[test]
    fn invalid_request_is_not_retryable() {
        assert!(!CompletionError::InvalidRequest("bad schema".into()).is_retryable());
        assert!(CompletionError::Transient("503".into()).is_retryable());
    }
}

//! Error types for remote calls and session mutations.
//!
//! `ApiError` is defined here rather than in `mocktest-client` so the
//! controller can downcast `anyhow` errors coming back from any
//! `AttemptApi` implementation and classify them without string matching.

use thiserror::Error;

/// Errors that can occur when talking to the remote attempt service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A per-attempt call was made before the server issued an attempt id.
    #[error("no active attempt")]
    NoActiveAttempt,

    /// The exam, attempt or question does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The attempt is in a state that does not accept the call (e.g. already submitted).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),
}

impl ApiError {
    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout(_) | ApiError::Network(_) => true,
            ApiError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Classify an `anyhow` error returned by an `AttemptApi` implementation.
    ///
    /// Errors that did not originate as an `ApiError` are treated as transient.
    pub fn is_retryable_error(error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<ApiError>()
            .map(ApiError::is_retryable)
            .unwrap_or(true)
    }
}

/// Errors raised by the session store and controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no exam session in progress")]
    NoSession,

    #[error("exam has no questions")]
    EmptyExam,

    #[error("exam session is already closed")]
    Completed,

    #[error("exam session is paused")]
    Paused,

    #[error("time is up for this exam session")]
    TimeUp,

    #[error("question {0} is not part of this exam")]
    UnknownQuestion(String),

    #[error("no active attempt: the server has not issued an attempt id for this session")]
    NoActiveAttempt,

    #[error("a submission is already in progress")]
    SubmissionInProgress,

    #[error("the session was reset or replaced while a request was in flight")]
    Superseded,

    /// The attempt service rejected or failed a call. Retrying may succeed.
    #[error("attempt service error: {0}")]
    Remote(String),

    #[error("no async runtime available: {0}")]
    Runtime(String),

    #[error("session storage error: {0}")]
    Storage(String),
}

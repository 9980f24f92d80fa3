//! Shared error types for the services crate.

use thiserror::Error;

use prep_core::model::SessionStateError;
use storage::repository::StorageError;

/// Errors emitted by the session engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no questions available for this session")]
    NoQuestionsAvailable,

    #[error("session not found")]
    SessionNotFound,

    #[error("network error: {0}")]
    Network(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("invalid answer: {0}")]
    InvalidAnswer(#[source] SessionStateError),

    #[error("session already completed")]
    SessionAlreadyComplete,
}

impl SessionError {
    /// Failures worth retrying once the collaborator recovers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Network(_) | SessionError::Backend(_))
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(msg) => SessionError::Network(msg),
            StorageError::Timeout => SessionError::Network("request timed out".into()),
            StorageError::NotFound => SessionError::SessionNotFound,
            other => SessionError::Backend(other.to_string()),
        }
    }
}

impl From<SessionStateError> for SessionError {
    fn from(err: SessionStateError) -> Self {
        match err {
            SessionStateError::Empty => SessionError::NoQuestionsAvailable,
            SessionStateError::Complete => SessionError::SessionAlreadyComplete,
            other => SessionError::InvalidAnswer(other),
        }
    }
}

/// Errors emitted while building `SessionSettings`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("seconds per question must be between {min} and {max}, got {found}")]
    SecondsPerQuestionOutOfRange { found: u32, min: u32, max: u32 },

    #[error("default question limit must be greater than zero")]
    ZeroDefaultLimit,
}

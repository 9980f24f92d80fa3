use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prep_core::model::{Difficulty, Question, QuestionId, QuestionKind, SessionId, TopicId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::InMemoryRepository;

/// Errors surfaced by backend adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

//
// ─── REQUEST SHAPES ────────────────────────────────────────────────────────────
//

/// Which question kinds a session draws from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionScope {
    #[default]
    Mixed,
    Kind(QuestionKind),
}

impl QuestionScope {
    #[must_use]
    pub fn includes(&self, kind: QuestionKind) -> bool {
        match self {
            QuestionScope::Mixed => true,
            QuestionScope::Kind(k) => *k == kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Practice,
    Simulation,
    Mistakes,
    Review,
}

impl SessionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Practice => "practice",
            SessionType::Simulation => "simulation",
            SessionType::Mistakes => "mistakes",
            SessionType::Review => "review",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "practice" => Some(Self::Practice),
            "simulation" => Some(Self::Simulation),
            "mistakes" => Some(Self::Mistakes),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// Label of the selection heuristic a pool used. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    UnseenPriority,
    RandomWeighted,
    SpacedRepetition,
    MistakeReview,
    FallbackReshuffle,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SelectionStrategy::UnseenPriority => "unseen_priority",
            SelectionStrategy::RandomWeighted => "random_weighted",
            SelectionStrategy::SpacedRepetition => "spaced_repetition",
            SelectionStrategy::MistakeReview => "mistake_review",
            SelectionStrategy::FallbackReshuffle => "fallback_reshuffle",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCriteria {
    pub user_id: UserId,
    pub scope: QuestionScope,
    pub difficulty: Option<Difficulty>,
    pub session_type: SessionType,
    pub limit: u32,
    pub topic_id: Option<TopicId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetadata {
    /// Candidates left after scope/topic/difficulty filters.
    pub pool_size: usize,
    /// Candidates the user has never answered.
    pub unseen: usize,
    pub requested: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSelection {
    pub questions: Vec<Question>,
    pub strategy: SelectionStrategy,
    pub metadata: PoolMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSession {
    pub user_id: UserId,
    pub difficulty: Option<Difficulty>,
    pub session_type: SessionType,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteSession {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub final_score: u32,
    pub total_questions: u32,
    pub completed_at: DateTime<Utc>,
}

/// Backend acknowledgement of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCompletion {
    pub session_id: SessionId,
    pub final_score: u32,
    pub total_questions: u32,
    pub completed_at: DateTime<Utc>,
}

/// One answered question, as reported to the progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEvent {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub selected_answer: Option<u8>,
    pub is_correct: bool,
    pub time_spent_secs: u32,
    pub difficulty: Difficulty,
    pub answered_at: DateTime<Utc>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Supplies candidate questions for a session.
#[async_trait]
pub trait QuestionPool: Send + Sync {
    /// Select up to `criteria.limit` questions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing source cannot be read.
    async fn get_questions(&self, criteria: &PoolCriteria) -> Result<PoolSelection, StorageError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new session and return its handle.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the session cannot be created.
    async fn start_session(&self, request: &StartSession) -> Result<SessionId, StorageError>;

    /// Record the final outcome of a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown sessions and
    /// `StorageError::Conflict` if the session was already completed.
    async fn complete_session(
        &self,
        request: &CompleteSession,
    ) -> Result<SessionCompletion, StorageError>;
}

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Persist one answer event.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the event cannot be stored.
    async fn record_answer(&self, event: &AnswerEvent) -> Result<(), StorageError>;
}

/// Aggregates the collaborators behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub pool: Arc<dyn QuestionPool>,
    pub sessions: Arc<dyn SessionStore>,
    pub progress: Arc<dyn ProgressTracker>,
}

impl Storage {
    /// All collaborators backed by one shared in-memory repository.
    #[must_use]
    pub fn in_memory(questions: Vec<Question>) -> Self {
        Self::from_repository(InMemoryRepository::with_questions(questions))
    }

    #[must_use]
    pub fn from_repository(repo: InMemoryRepository) -> Self {
        let pool: Arc<dyn QuestionPool> = Arc::new(repo.clone());
        let sessions: Arc<dyn SessionStore> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressTracker> = Arc::new(repo);
        Self {
            pool,
            sessions,
            progress,
        }
    }
}

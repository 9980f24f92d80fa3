use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use prep_core::model::{Question, QuestionId, SessionId, UserId};
use rand::rng;
use rand::seq::SliceRandom;

use crate::repository::{
    AnswerEvent, CompleteSession, PoolCriteria, PoolMetadata, PoolSelection, ProgressTracker,
    QuestionPool, SelectionStrategy, SessionCompletion, SessionStore, SessionType, StartSession,
    StorageError,
};

#[derive(Debug, Clone)]
struct SessionRow {
    request: StartSession,
    completion: Option<SessionCompletion>,
}

/// Answer history of one question for one user.
#[derive(Debug, Clone, Copy, Default)]
struct QuestionStats {
    wrong: u32,
    last_correct: bool,
    /// Position of the latest answer in the event log.
    last_seen: usize,
}

/// In-memory question pool, session store and progress tracker over shared state.
///
/// Intended for tests, demos and offline runs.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    questions: Arc<Mutex<Vec<Question>>>,
    sessions: Arc<Mutex<HashMap<SessionId, SessionRow>>>,
    answers: Arc<Mutex<Vec<AnswerEvent>>>,
    shuffle: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::Connection(e.to_string()))
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_questions(questions: Vec<Question>) -> Self {
        Self {
            questions: Arc::new(Mutex::new(questions)),
            ..Self::default()
        }
    }

    /// Enable or disable shuffling of candidates before selection.
    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Add questions to the pool.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when an id is already present.
    pub fn insert_questions(&self, questions: Vec<Question>) -> Result<(), StorageError> {
        let mut guard = lock(&self.questions)?;
        for question in questions {
            if guard.iter().any(|q| q.id() == question.id()) {
                return Err(StorageError::Conflict);
            }
            guard.push(question);
        }
        Ok(())
    }

    /// Recorded answer events of `user`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the state lock is poisoned.
    pub fn answers_for(&self, user: &UserId) -> Result<Vec<AnswerEvent>, StorageError> {
        let guard = lock(&self.answers)?;
        Ok(guard.iter().filter(|e| &e.user_id == user).cloned().collect())
    }

    /// Completion record of a session, if it was completed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown sessions.
    pub fn completion(&self, id: &SessionId) -> Result<Option<SessionCompletion>, StorageError> {
        let guard = lock(&self.sessions)?;
        guard
            .get(id)
            .map(|row| row.completion.clone())
            .ok_or(StorageError::NotFound)
    }

    fn stats_for(&self, user: &UserId) -> Result<HashMap<QuestionId, QuestionStats>, StorageError> {
        let guard = lock(&self.answers)?;
        let mut stats: HashMap<QuestionId, QuestionStats> = HashMap::new();
        for (seq, event) in guard.iter().enumerate().filter(|(_, e)| &e.user_id == user) {
            let entry = stats.entry(event.question_id).or_default();
            if !event.is_correct {
                entry.wrong += 1;
            }
            entry.last_correct = event.is_correct;
            entry.last_seen = seq;
        }
        Ok(stats)
    }

    fn shuffle_in_place(&self, questions: &mut [Question]) {
        if self.shuffle {
            questions.shuffle(&mut rng());
        }
    }

    fn select(&self, criteria: &PoolCriteria) -> Result<PoolSelection, StorageError> {
        let all = lock(&self.questions)?.clone();
        let stats = self.stats_for(&criteria.user_id)?;

        // the topic narrows reading questions only; other kinds stay eligible
        let in_scope = |q: &Question| {
            criteria.scope.includes(q.kind())
                && (!q.is_reading()
                    || criteria.topic_id.as_ref().is_none_or(|t| q.matches_topic(t)))
        };
        let mut candidates: Vec<Question> = all
            .iter()
            .filter(|&q| in_scope(q) && criteria.difficulty.is_none_or(|d| q.difficulty() == d))
            .cloned()
            .collect();

        let mut fallback = false;
        if candidates.is_empty() && criteria.difficulty.is_some() {
            candidates = all.iter().filter(|&q| in_scope(q)).cloned().collect();
            fallback = true;
        }

        let seen = |q: &Question| stats.get(&q.id()).copied();
        let last_seen = |q: &Question| seen(q).map_or(usize::MAX, |s| s.last_seen);
        let unseen = candidates.iter().filter(|&q| seen(q).is_none()).count();
        let metadata = PoolMetadata {
            pool_size: candidates.len(),
            unseen,
            requested: criteria.limit,
        };

        let (strategy, mut ordered) = if fallback {
            self.shuffle_in_place(&mut candidates);
            (SelectionStrategy::FallbackReshuffle, candidates)
        } else {
            match criteria.session_type {
                SessionType::Mistakes => {
                    let mut mistakes: Vec<Question> = candidates
                        .into_iter()
                        .filter(|q| seen(q).is_some_and(|s| !s.last_correct))
                        .collect();
                    mistakes.sort_by_key(|q| last_seen(q));
                    (SelectionStrategy::MistakeReview, mistakes)
                }
                SessionType::Review => {
                    let mut reviewed: Vec<Question> = candidates
                        .into_iter()
                        .filter(|q| seen(q).is_some())
                        .collect();
                    reviewed.sort_by_key(|q| last_seen(q));
                    (SelectionStrategy::SpacedRepetition, reviewed)
                }
                SessionType::Practice | SessionType::Simulation if unseen > 0 => {
                    let (mut fresh, mut repeat): (Vec<Question>, Vec<Question>) =
                        candidates.into_iter().partition(|q| seen(q).is_none());
                    self.shuffle_in_place(&mut fresh);
                    repeat.sort_by_key(|q| last_seen(q));
                    fresh.extend(repeat);
                    (SelectionStrategy::UnseenPriority, fresh)
                }
                SessionType::Practice | SessionType::Simulation => {
                    self.shuffle_in_place(&mut candidates);
                    candidates.sort_by_key(|q| std::cmp::Reverse(seen(q).map_or(0, |s| s.wrong)));
                    (SelectionStrategy::RandomWeighted, candidates)
                }
            }
        };

        ordered.truncate(usize::try_from(criteria.limit).unwrap_or(usize::MAX));
        Ok(PoolSelection {
            questions: ordered,
            strategy,
            metadata,
        })
    }
}

#[async_trait]
impl QuestionPool for InMemoryRepository {
    async fn get_questions(&self, criteria: &PoolCriteria) -> Result<PoolSelection, StorageError> {
        self.select(criteria)
    }
}

#[async_trait]
impl SessionStore for InMemoryRepository {
    async fn start_session(&self, request: &StartSession) -> Result<SessionId, StorageError> {
        let mut guard = lock(&self.sessions)?;
        let id = SessionId::random();
        guard.insert(
            id.clone(),
            SessionRow {
                request: request.clone(),
                completion: None,
            },
        );
        Ok(id)
    }

    async fn complete_session(
        &self,
        request: &CompleteSession,
    ) -> Result<SessionCompletion, StorageError> {
        let mut guard = lock(&self.sessions)?;
        let row = guard
            .get_mut(&request.session_id)
            .ok_or(StorageError::NotFound)?;
        if row.request.user_id != request.user_id {
            return Err(StorageError::NotFound);
        }
        if row.completion.is_some() {
            return Err(StorageError::Conflict);
        }
        let completion = SessionCompletion {
            session_id: request.session_id.clone(),
            final_score: request.final_score,
            total_questions: request.total_questions,
            completed_at: request.completed_at,
        };
        row.completion = Some(completion.clone());
        Ok(completion)
    }
}

#[async_trait]
impl ProgressTracker for InMemoryRepository {
    async fn record_answer(&self, event: &AnswerEvent) -> Result<(), StorageError> {
        let mut guard = lock(&self.answers)?;
        guard.push(event.clone());
        Ok(())
    }
}

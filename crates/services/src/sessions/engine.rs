use std::sync::Arc;

use prep_core::Clock;
use prep_core::grouping::group_passages;
use prep_core::model::{
    Advance, Difficulty, Session, SessionResult, SubmittedAnswer, TickEffect, TopicId, UserId,
};
use prep_core::timer::{SessionTimer, TimerHandle};
use storage::repository::{
    AnswerEvent, CompleteSession, PoolCriteria, ProgressTracker, QuestionPool, QuestionScope,
    SelectionStrategy, SessionStore, SessionType, StartSession, Storage, StorageError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::error::SessionError;
use crate::sessions::progress::{NavigatorItem, SessionProgress, navigator};
use crate::sessions::reporting::{Notice, spawn_answer_report};
use crate::sessions::ticker::{Ticker, TimerTick};

/// What to ask the question pool for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCriteria {
    pub scope: QuestionScope,
    pub difficulty: Option<Difficulty>,
    pub session_type: SessionType,
    /// Falls back to `SessionSettings::default_limit` when unset.
    pub limit: Option<u32>,
    /// Reading questions of this topic are grouped by passage.
    pub topic_id: Option<TopicId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    Loading,
    Ready,
    Complete,
}

/// Result of moving forward.
#[derive(Debug, Clone, PartialEq)]
pub enum NextOutcome {
    Moved { index: usize },
    Completed(SessionResult),
}

/// Result of handling one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    /// Stale tick, or a tick for another session.
    Ignored,
    Counting { remaining: u32 },
    Expired {
        submitted: Option<SubmittedAnswer>,
        /// Set when auto-advance moved on after the timeout.
        advanced: Option<NextOutcome>,
    },
}

/// Drives one session at a time against the storage collaborators.
///
/// Local transitions are synchronous; answer reports run as detached tasks and
/// never block or roll back the session. The engine owns the only ticker, so at
/// most one countdown task exists.
pub struct SessionEngine {
    user_id: UserId,
    settings: SessionSettings,
    clock: Clock,
    pool: Arc<dyn QuestionPool>,
    sessions: Arc<dyn SessionStore>,
    progress: Arc<dyn ProgressTracker>,
    phase: EnginePhase,
    session: Option<Session>,
    strategy: Option<SelectionStrategy>,
    completion_reported: bool,
    ticker: Ticker,
    ticks: mpsc::UnboundedReceiver<TimerTick>,
    notices_tx: mpsc::UnboundedSender<Notice>,
    notices_rx: mpsc::UnboundedReceiver<Notice>,
    in_flight: Vec<JoinHandle<()>>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(user_id: UserId, settings: SessionSettings, storage: &Storage) -> Self {
        let (ticker, ticks) = Ticker::per_second();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        Self {
            user_id,
            settings,
            clock: Clock::default(),
            pool: Arc::clone(&storage.pool),
            sessions: Arc::clone(&storage.sessions),
            progress: Arc::clone(&storage.progress),
            phase: EnginePhase::Uninitialized,
            session: None,
            strategy: None,
            completion_reported: false,
            ticker,
            ticks,
            notices_tx,
            notices_rx,
            in_flight: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Move a fixed clock forward.
    pub fn advance_clock(&mut self, delta: chrono::Duration) {
        self.clock.advance(delta);
    }

    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Strategy label reported by the pool for the current session.
    #[must_use]
    pub fn strategy(&self) -> Option<SelectionStrategy> {
        self.strategy
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == EnginePhase::Complete
    }

    /// Whether the session store acknowledged completion.
    #[must_use]
    pub fn is_completion_reported(&self) -> bool {
        self.completion_reported
    }

    #[must_use]
    pub fn progress(&self) -> Option<SessionProgress> {
        self.session.as_ref().map(SessionProgress::of)
    }

    #[must_use]
    pub fn navigator(&self) -> Vec<NavigatorItem> {
        self.session.as_ref().map(navigator).unwrap_or_default()
    }

    /// Handle of the countdown the ticker is feeding, if any.
    #[must_use]
    pub fn live_timer(&self) -> Option<TimerHandle> {
        self.ticker.live_handle()
    }

    fn session_mut(&mut self) -> Result<&mut Session, SessionError> {
        self.session.as_mut().ok_or(SessionError::SessionNotFound)
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Fetch questions and a session id, then position on the first question.
    ///
    /// Any previous session is dropped. On failure no session exists and the call
    /// can simply be repeated.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoQuestionsAvailable` when the pool is empty for the
    /// criteria, or the mapped collaborator failure.
    pub async fn initialize(&mut self, criteria: SessionCriteria) -> Result<(), SessionError> {
        self.ticker.cancel();
        self.session = None;
        self.strategy = None;
        self.completion_reported = false;
        self.phase = EnginePhase::Loading;

        let limit = criteria.limit.unwrap_or(self.settings.default_limit());
        let pool_criteria = PoolCriteria {
            user_id: self.user_id.clone(),
            scope: criteria.scope,
            difficulty: criteria.difficulty,
            session_type: criteria.session_type,
            limit,
            topic_id: criteria.topic_id.clone(),
        };
        let selection = self.pool.get_questions(&pool_criteria).await.map_err(|err| {
            warn!(error = %err, "question pool request failed");
            SessionError::from(err)
        })?;
        if selection.questions.is_empty() {
            return Err(SessionError::NoQuestionsAvailable);
        }
        debug!(
            strategy = %selection.strategy,
            pool_size = selection.metadata.pool_size,
            unseen = selection.metadata.unseen,
            "question pool answered"
        );

        let questions = match &criteria.topic_id {
            Some(topic) => group_passages(selection.questions, topic),
            None => selection.questions,
        };

        let session_id = self
            .sessions
            .start_session(&StartSession {
                user_id: self.user_id.clone(),
                difficulty: criteria.difficulty,
                session_type: criteria.session_type,
                limit,
            })
            .await
            .map_err(|err| {
                warn!(error = %err, "session start failed");
                SessionError::from(err)
            })?;

        let timer = if self.settings.enable_timer() {
            SessionTimer::new(true, self.settings.seconds_per_question())
        } else {
            SessionTimer::disabled()
        };
        let mut session = Session::new(session_id, questions, timer, self.clock.now())?;
        let handle = session.start_timer();

        info!(
            session_id = %session.id(),
            questions = session.len(),
            strategy = %selection.strategy,
            "session started"
        );
        self.strategy = Some(selection.strategy);
        self.session = Some(session);
        self.phase = EnginePhase::Ready;
        self.schedule(handle);
        Ok(())
    }

    /// Stop the countdown and drop the tick source. The session itself is kept.
    pub fn shutdown(&mut self) {
        self.ticker.cancel();
        if let Some(session) = self.session.as_mut() {
            session.stop_timer();
        }
    }

    fn schedule(&mut self, handle: Option<TimerHandle>) {
        self.ticker.cancel();
        if let (Some(handle), Some(session)) = (handle, self.session.as_ref()) {
            self.ticker.schedule(session.id().clone(), handle);
        }
    }

    //
    // ─── ANSWERING ─────────────────────────────────────────────────────────────
    //

    /// Choose an option for the current question without submitting it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidAnswer` for out-of-range options or a question
    /// already answered, `SessionError::SessionAlreadyComplete` after completion.
    pub fn select_answer(&mut self, option: usize) -> Result<(), SessionError> {
        self.session_mut()?.select_answer(option)?;
        Ok(())
    }

    /// Lock in the current selection and report it in the background.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidAnswer` when nothing is selected or the question
    /// was already submitted, `SessionError::SessionAlreadyComplete` after completion.
    pub fn submit_answer(&mut self) -> Result<SubmittedAnswer, SessionError> {
        let now = self.clock.now();
        let submitted = self.session_mut()?.submit_answer(now)?;
        self.ticker.cancel();
        debug!(
            question_id = %submitted.question_id,
            correct = submitted.is_correct,
            "answer submitted"
        );
        self.report(&submitted);
        Ok(submitted)
    }

    fn report(&mut self, submitted: &SubmittedAnswer) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let event = AnswerEvent {
            user_id: self.user_id.clone(),
            session_id: session.id().clone(),
            question_id: submitted.question_id,
            selected_answer: submitted.selected,
            is_correct: submitted.is_correct,
            time_spent_secs: submitted.time_spent_secs,
            difficulty: submitted.difficulty,
            answered_at: self.clock.now(),
        };
        let task = spawn_answer_report(
            Arc::clone(&self.progress),
            event,
            self.notices_tx.clone(),
        );
        self.in_flight.retain(|pending| !pending.is_finished());
        self.in_flight.push(task);
    }

    /// Wait for every outstanding answer report to settle.
    pub async fn flush_reports(&mut self) {
        for task in self.in_flight.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "answer report task did not finish");
            }
        }
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Advance to the next question, or complete the session from the last one.
    ///
    /// When completion reaches the session store and fails, the session stays
    /// complete with its local result and the error is returned; see
    /// `retry_completion`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionAlreadyComplete` after completion, or the
    /// mapped failure of the completion call.
    pub async fn next_question(&mut self) -> Result<NextOutcome, SessionError> {
        let now = self.clock.now();
        match self.session_mut()?.next_question(now)? {
            Advance::Moved { index, timer } => {
                debug!(index, "moved to next question");
                self.schedule(timer);
                Ok(NextOutcome::Moved { index })
            }
            Advance::Completed => self.finalize().await.map(NextOutcome::Completed),
        }
    }

    /// Jump to any question of the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidAnswer` for an index outside the session, or
    /// `SessionError::SessionAlreadyComplete` after completion.
    pub fn navigate_to(&mut self, index: usize) -> Result<(), SessionError> {
        let now = self.clock.now();
        let timer = self.session_mut()?.navigate_to(index, now)?;
        debug!(index, "navigated");
        self.schedule(timer);
        Ok(())
    }

    /// Flip the review mark of the current question, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionAlreadyComplete` after completion.
    pub fn toggle_flag(&mut self) -> Result<bool, SessionError> {
        Ok(self.session_mut()?.toggle_flag()?)
    }

    /// Discard answers, flags and score and return to the first question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionAlreadyComplete` after completion.
    pub fn reset_progress(&mut self) -> Result<(), SessionError> {
        let now = self.clock.now();
        let timer = self.session_mut()?.reset_progress(now)?;
        info!("session progress reset");
        self.schedule(timer);
        Ok(())
    }

    //
    // ─── TIMER ─────────────────────────────────────────────────────────────────
    //

    /// Wait for the next tick from the live countdown.
    ///
    /// Pending forever while no countdown is scheduled, which makes it safe to use
    /// as a `select!` branch.
    pub async fn next_tick(&mut self) -> Option<TimerTick> {
        self.ticks.recv().await
    }

    /// Apply one tick to the session.
    ///
    /// Ticks from a replaced countdown or another session are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error only when auto-advance hits a failing completion call.
    pub async fn handle_tick(&mut self, tick: TimerTick) -> Result<TickResult, SessionError> {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return Ok(TickResult::Ignored);
        };
        if session.id() != &tick.session_id {
            debug!(session_id = %tick.session_id, "tick for another session discarded");
            return Ok(TickResult::Ignored);
        }

        match session.tick(tick.handle, now) {
            TickEffect::Ignored => {
                debug!(handle = ?tick.handle, "stale tick discarded");
                Ok(TickResult::Ignored)
            }
            TickEffect::Counting { remaining } => Ok(TickResult::Counting { remaining }),
            TickEffect::Expired { submitted } => {
                self.ticker.cancel();
                info!(handle = ?tick.handle, "question timed out");
                if let Some(submitted) = &submitted {
                    self.report(submitted);
                }
                let advanced = if self.settings.auto_advance_on_expiry() {
                    Some(self.next_question().await?)
                } else {
                    None
                };
                Ok(TickResult::Expired {
                    submitted,
                    advanced,
                })
            }
        }
    }

    //
    // ─── COMPLETION ────────────────────────────────────────────────────────────
    //

    /// Complete the session and report it to the session store once.
    ///
    /// Repeated calls return the same result without a second report.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotFound` without a session, or the mapped
    /// failure of the completion call. The session is complete either way.
    pub async fn finalize(&mut self) -> Result<SessionResult, SessionError> {
        let now = self.clock.now();
        let result = self.session_mut()?.finalize(now).clone();
        self.ticker.cancel();
        self.phase = EnginePhase::Complete;
        self.report_completion(&result).await?;
        Ok(result)
    }

    /// Re-attempt a completion report that failed earlier.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotFound` when no completed session exists, or
    /// the mapped failure of the completion call.
    pub async fn retry_completion(&mut self) -> Result<SessionResult, SessionError> {
        let result = self
            .session
            .as_ref()
            .and_then(Session::result)
            .cloned()
            .ok_or(SessionError::SessionNotFound)?;
        self.report_completion(&result).await?;
        Ok(result)
    }

    async fn report_completion(&mut self, result: &SessionResult) -> Result<(), SessionError> {
        if self.completion_reported {
            return Ok(());
        }
        let request = CompleteSession {
            user_id: self.user_id.clone(),
            session_id: result.session_id().clone(),
            final_score: result.final_score(),
            total_questions: result.total_questions(),
            completed_at: result.completed_at(),
        };
        match self.sessions.complete_session(&request).await {
            Ok(ack) => {
                self.completion_reported = true;
                info!(
                    session_id = %ack.session_id,
                    score = ack.final_score,
                    total = ack.total_questions,
                    "session completed"
                );
                Ok(())
            }
            // an earlier attempt reached the store before failing
            Err(StorageError::Conflict) => {
                self.completion_reported = true;
                debug!(session_id = %request.session_id, "completion already recorded");
                Ok(())
            }
            Err(err) => {
                warn!(
                    session_id = %request.session_id,
                    error = %err,
                    "failed to report session completion"
                );
                Err(err.into())
            }
        }
    }

    //
    // ─── NOTICES ───────────────────────────────────────────────────────────────
    //

    /// Next background notice, if one is queued.
    pub fn try_notice(&mut self) -> Option<Notice> {
        self.notices_rx.try_recv().ok()
    }

    /// Wait for the next background notice.
    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices_rx.recv().await
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::iter::from_fn(|| self.try_notice()).collect()
    }
}

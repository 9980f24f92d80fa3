use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{QuestionId, SessionId};
use crate::model::question::{Difficulty, OPTION_COUNT, Question};
use crate::model::result::{SessionResult, SessionTally};
use crate::time::elapsed_secs;
use crate::timer::{SessionTimer, TickOutcome, TimerHandle};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Transitions rejected locally, before anything reaches a collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("session has no questions")]
    Empty,

    #[error("option {option} is outside 0..=3")]
    OptionOutOfRange { option: usize },

    #[error("question {index} has already been answered")]
    AlreadyAnswered { index: usize },

    #[error("no answer selected for question {index}")]
    NoSelection { index: usize },

    #[error("question index {index} is outside 0..{len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("session already completed")]
    Complete,
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// What was recorded for one position of the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub selected: Option<u8>,
    pub is_correct: bool,
    pub time_spent_secs: u32,
    pub timed_out: bool,
    pub answered_at: DateTime<Utc>,
}

/// Emitted by a successful submit; feeds the progress tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAnswer {
    pub index: usize,
    pub question_id: QuestionId,
    pub difficulty: Difficulty,
    pub selected: Option<u8>,
    pub is_correct: bool,
    pub time_spent_secs: u32,
    pub timed_out: bool,
}

/// Outcome of moving forward from the current question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved {
        index: usize,
        timer: Option<TimerHandle>,
    },
    Completed,
}

/// Outcome of delivering one timer tick to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEffect {
    /// Tick from a schedule that is no longer live.
    Ignored,
    Counting { remaining: u32 },
    /// Countdown reached zero; `submitted` is set when the question was still open.
    Expired { submitted: Option<SubmittedAnswer> },
}

/// Position-level status used by question navigators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Unanswered,
    Correct,
    Incorrect,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One attempt at a fixed, ordered sequence of questions.
///
/// All mutation goes through the transition methods below; none of them perform I/O.
/// Every transition that can leave a countdown behind returns the timer handle it
/// started so the caller can schedule exactly one tick source for it.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    questions: Vec<Question>,
    current: usize,
    selection: Option<u8>,
    answers: BTreeMap<usize, AnswerRecord>,
    flags: BTreeSet<usize>,
    score: u32,
    timer: SessionTimer,
    started_at: DateTime<Utc>,
    question_started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<SessionResult>,
}

impl Session {
    /// Create a session positioned on the first question. The timer is not started.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Empty` if `questions` is empty.
    pub fn new(
        id: SessionId,
        questions: Vec<Question>,
        timer: SessionTimer,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionStateError> {
        if questions.is_empty() {
            return Err(SessionStateError::Empty);
        }
        Ok(Self {
            id,
            questions,
            current: 0,
            selection: None,
            answers: BTreeMap::new(),
            flags: BTreeSet::new(),
            score: 0,
            timer,
            started_at,
            question_started_at: started_at,
            completed_at: None,
            result: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> &Question {
        &self.questions[self.current]
    }

    /// Option chosen for the current question, submitted or not.
    #[must_use]
    pub fn selection(&self) -> Option<u8> {
        self.selection
    }

    #[must_use]
    pub fn answer(&self, index: usize) -> Option<&AnswerRecord> {
        self.answers.get(&index)
    }

    #[must_use]
    pub fn is_answered(&self, index: usize) -> bool {
        self.answers.contains_key(&index)
    }

    #[must_use]
    pub fn is_current_answered(&self) -> bool {
        self.is_answered(self.current)
    }

    #[must_use]
    pub fn is_flagged(&self, index: usize) -> bool {
        self.flags.contains(&index)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn flagged_count(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn timer(&self) -> &SessionTimer {
        &self.timer
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn result(&self) -> Option<&SessionResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn status(&self, index: usize) -> QuestionStatus {
        match self.answers.get(&index) {
            None => QuestionStatus::Unanswered,
            Some(record) if record.is_correct => QuestionStatus::Correct,
            Some(_) => QuestionStatus::Incorrect,
        }
    }

    #[must_use]
    pub fn tally(&self) -> SessionTally {
        SessionTally {
            score: self.score,
            answered: count_u32(self.answers.len()),
            total: count_u32(self.questions.len()),
            flagged: count_u32(self.flags.len()),
        }
    }

    fn ensure_open(&self) -> Result<(), SessionStateError> {
        if self.is_complete() {
            return Err(SessionStateError::Complete);
        }
        Ok(())
    }

    /// Start the countdown for the current question if it is open and timing is enabled.
    pub fn start_timer(&mut self) -> Option<TimerHandle> {
        if self.is_complete() || self.is_current_answered() {
            return None;
        }
        self.timer.start()
    }

    /// Stop the live countdown, returning the cancelled handle.
    pub fn stop_timer(&mut self) -> Option<TimerHandle> {
        self.timer.stop()
    }

    /// Record an in-memory choice for the current question.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Complete` after completion,
    /// `SessionStateError::AlreadyAnswered` if the current question was submitted, or
    /// `SessionStateError::OptionOutOfRange` if `option` is not in `0..=3`.
    pub fn select_answer(&mut self, option: usize) -> Result<(), SessionStateError> {
        self.ensure_open()?;
        if self.is_current_answered() {
            return Err(SessionStateError::AlreadyAnswered {
                index: self.current,
            });
        }
        let selected = u8::try_from(option)
            .ok()
            .filter(|_| option < OPTION_COUNT)
            .ok_or(SessionStateError::OptionOutOfRange { option })?;
        self.selection = Some(selected);
        Ok(())
    }

    /// Submit the current selection.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NoSelection` when nothing was selected,
    /// `SessionStateError::AlreadyAnswered` on a second submit, or
    /// `SessionStateError::Complete` after completion.
    pub fn submit_answer(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<SubmittedAnswer, SessionStateError> {
        self.ensure_open()?;
        if self.is_current_answered() {
            return Err(SessionStateError::AlreadyAnswered {
                index: self.current,
            });
        }
        if self.selection.is_none() {
            return Err(SessionStateError::NoSelection {
                index: self.current,
            });
        }
        self.record_current(self.selection, now, false)
    }

    fn record_current(
        &mut self,
        selected: Option<u8>,
        now: DateTime<Utc>,
        timed_out: bool,
    ) -> Result<SubmittedAnswer, SessionStateError> {
        let index = self.current;
        if self.answers.contains_key(&index) {
            return Err(SessionStateError::AlreadyAnswered { index });
        }

        let question = &self.questions[index];
        let is_correct = selected.is_some_and(|s| question.is_correct(s));
        let time_spent_secs = elapsed_secs(self.question_started_at, now);
        let submitted = SubmittedAnswer {
            index,
            question_id: question.id(),
            difficulty: question.difficulty(),
            selected,
            is_correct,
            time_spent_secs,
            timed_out,
        };

        self.answers.insert(
            index,
            AnswerRecord {
                question_id: question.id(),
                selected,
                is_correct,
                time_spent_secs,
                timed_out,
                answered_at: now,
            },
        );
        if is_correct {
            self.score += 1;
        }
        self.timer.stop();
        Ok(submitted)
    }

    /// Deliver one elapsed second from the schedule identified by `handle`.
    ///
    /// On expiry an open question is submitted with whatever is selected, possibly nothing.
    pub fn tick(&mut self, handle: TimerHandle, now: DateTime<Utc>) -> TickEffect {
        if self.is_complete() {
            return TickEffect::Ignored;
        }
        match self.timer.tick(handle) {
            TickOutcome::Stale => TickEffect::Ignored,
            TickOutcome::Running { remaining } => TickEffect::Counting { remaining },
            TickOutcome::Expired => TickEffect::Expired {
                submitted: self.record_current(self.selection, now, true).ok(),
            },
        }
    }

    /// Move to the following question, or complete the session from the last one.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Complete` after completion.
    pub fn next_question(&mut self, now: DateTime<Utc>) -> Result<Advance, SessionStateError> {
        self.ensure_open()?;
        if self.current + 1 >= self.questions.len() {
            self.complete(now);
            return Ok(Advance::Completed);
        }
        self.current += 1;
        let timer = self.enter_current(now);
        Ok(Advance::Moved {
            index: self.current,
            timer,
        })
    }

    /// Jump to any position, restoring what was recorded there.
    ///
    /// The countdown restarts with the full duration when the target is still open.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::IndexOutOfRange` for an invalid index or
    /// `SessionStateError::Complete` after completion.
    pub fn navigate_to(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<TimerHandle>, SessionStateError> {
        self.ensure_open()?;
        if index >= self.questions.len() {
            return Err(SessionStateError::IndexOutOfRange {
                index,
                len: self.questions.len(),
            });
        }
        self.current = index;
        Ok(self.enter_current(now))
    }

    fn enter_current(&mut self, now: DateTime<Utc>) -> Option<TimerHandle> {
        self.timer.stop();
        self.selection = self.answers.get(&self.current).and_then(|a| a.selected);
        self.question_started_at = now;
        if self.is_current_answered() {
            return None;
        }
        self.timer.restart()
    }

    /// Flip the review mark of the current question and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Complete` after completion.
    pub fn toggle_flag(&mut self) -> Result<bool, SessionStateError> {
        self.ensure_open()?;
        if self.flags.remove(&self.current) {
            return Ok(false);
        }
        self.flags.insert(self.current);
        Ok(true)
    }

    /// Start over: drop answers, flags and score and return to the first question.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Complete` after completion.
    pub fn reset_progress(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<TimerHandle>, SessionStateError> {
        self.ensure_open()?;
        self.answers.clear();
        self.flags.clear();
        self.score = 0;
        self.current = 0;
        Ok(self.enter_current(now))
    }

    /// End the session at `now`. No effect once complete.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        if self.is_complete() {
            return;
        }
        self.timer.stop();
        self.selection = None;
        self.completed_at = Some(now);
    }

    /// Compute the session result, completing the session first if needed.
    ///
    /// The result is computed once; later calls return the same value.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> &SessionResult {
        self.complete(now);
        let completed_at = self.completed_at.unwrap_or(now);
        let tally = self.tally();
        let id = self.id.clone();
        let started_at = self.started_at;
        self.result
            .get_or_insert_with(|| SessionResult::from_tally(id, tally, started_at, completed_at))
    }
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionDraft, QuestionKind};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn question(id: u64, correct: i64) -> Question {
        QuestionDraft::new(
            id,
            QuestionKind::SentenceCompletion,
            format!("Q{id}"),
            ["a", "b", "c", "d"],
            correct,
        )
        .validate()
        .unwrap()
    }

    fn session(n: u64, timer: SessionTimer) -> Session {
        let questions = (1..=n).map(|id| question(id, 0)).collect();
        Session::new(SessionId::new("test"), questions, timer, fixed_now()).unwrap()
    }

    fn assert_invariants(s: &Session) {
        assert!(s.score() as usize <= s.answered_count());
        assert!(s.answered_count() <= s.len());
    }

    #[test]
    fn empty_question_list_is_rejected() {
        let err = Session::new(
            SessionId::new("x"),
            Vec::new(),
            SessionTimer::disabled(),
            fixed_now(),
        )
        .unwrap_err();
        assert_eq!(err, SessionStateError::Empty);
    }

    #[test]
    fn select_validates_option_range() {
        let mut s = session(2, SessionTimer::disabled());
        assert_eq!(
            s.select_answer(4),
            Err(SessionStateError::OptionOutOfRange { option: 4 })
        );
        s.select_answer(3).unwrap();
        assert_eq!(s.selection(), Some(3));
        assert_eq!(s.answered_count(), 0);
    }

    #[test]
    fn submit_requires_selection_and_rejects_double_submit() {
        let mut s = session(2, SessionTimer::disabled());
        assert_eq!(
            s.submit_answer(fixed_now()),
            Err(SessionStateError::NoSelection { index: 0 })
        );
        s.select_answer(0).unwrap();
        let submitted = s.submit_answer(fixed_now()).unwrap();
        assert!(submitted.is_correct);
        assert_eq!(s.score(), 1);
        assert_eq!(
            s.submit_answer(fixed_now()),
            Err(SessionStateError::AlreadyAnswered { index: 0 })
        );
        assert_eq!(
            s.select_answer(1),
            Err(SessionStateError::AlreadyAnswered { index: 0 })
        );
        assert_eq!(s.score(), 1);
        assert_invariants(&s);
    }

    #[test]
    fn submit_measures_time_spent() {
        let mut s = session(1, SessionTimer::disabled());
        s.select_answer(2).unwrap();
        let submitted = s.submit_answer(fixed_now() + Duration::seconds(7)).unwrap();
        assert_eq!(submitted.time_spent_secs, 7);
        assert!(!submitted.is_correct);
        assert_eq!(s.status(0), QuestionStatus::Incorrect);
    }

    #[test]
    fn next_question_completes_from_last() {
        let mut s = session(2, SessionTimer::disabled());
        assert!(matches!(
            s.next_question(fixed_now()).unwrap(),
            Advance::Moved { index: 1, timer: None }
        ));
        assert_eq!(s.next_question(fixed_now()).unwrap(), Advance::Completed);
        assert!(s.is_complete());
        assert_eq!(
            s.next_question(fixed_now()),
            Err(SessionStateError::Complete)
        );
        assert_eq!(s.toggle_flag(), Err(SessionStateError::Complete));
    }

    #[test]
    fn navigation_restores_recorded_selection() {
        let mut s = session(3, SessionTimer::new(true, 30));
        s.start_timer();
        s.select_answer(2).unwrap();
        s.submit_answer(fixed_now()).unwrap();
        s.navigate_to(2, fixed_now()).unwrap();
        assert_eq!(s.selection(), None);

        let timer = s.navigate_to(0, fixed_now()).unwrap();
        assert!(timer.is_none());
        assert_eq!(s.selection(), Some(2));
        assert!(!s.timer().is_active());

        assert_eq!(
            s.navigate_to(3, fixed_now()),
            Err(SessionStateError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(s.current_index(), 0);
    }

    #[test]
    fn navigation_replaces_the_live_countdown() {
        let mut s = session(3, SessionTimer::new(true, 30));
        let first = s.start_timer().unwrap();
        let second = s.navigate_to(1, fixed_now()).unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(s.tick(first, fixed_now()), TickEffect::Ignored);
        assert_eq!(
            s.tick(second, fixed_now()),
            TickEffect::Counting { remaining: 29 }
        );
        assert_eq!(s.timer().live_handle(), Some(second));
    }

    #[test]
    fn expiry_submits_without_selection() {
        let mut s = session(2, SessionTimer::new(true, 10));
        let handle = s.start_timer().unwrap();
        for remaining in (1..10).rev() {
            assert_eq!(
                s.tick(handle, fixed_now()),
                TickEffect::Counting { remaining }
            );
        }
        let TickEffect::Expired { submitted: Some(submitted) } = s.tick(handle, fixed_now())
        else {
            panic!("expected an automatic submit");
        };
        assert!(submitted.timed_out);
        assert_eq!(submitted.selected, None);
        assert!(s.is_current_answered());
        assert_eq!(s.score(), 0);
        assert!(matches!(
            s.next_question(fixed_now()).unwrap(),
            Advance::Moved { index: 1, .. }
        ));
    }

    #[test]
    fn expiry_uses_pending_selection() {
        let mut s = session(1, SessionTimer::new(true, 1));
        let handle = s.start_timer().unwrap();
        s.select_answer(0).unwrap();
        let TickEffect::Expired { submitted: Some(submitted) } = s.tick(handle, fixed_now())
        else {
            panic!("expected an automatic submit");
        };
        assert!(submitted.is_correct);
        assert_eq!(s.score(), 1);
    }

    #[test]
    fn flag_toggle_twice_is_identity() {
        let mut s = session(2, SessionTimer::disabled());
        assert!(!s.is_flagged(0));
        assert!(s.toggle_flag().unwrap());
        assert!(s.is_flagged(0));
        assert!(!s.toggle_flag().unwrap());
        assert!(!s.is_flagged(0));
        assert_eq!(s.answered_count(), 0);
    }

    #[test]
    fn reset_clears_progress_and_restarts_timer() {
        let mut s = session(3, SessionTimer::new(true, 20));
        s.start_timer();
        s.select_answer(0).unwrap();
        s.submit_answer(fixed_now()).unwrap();
        s.toggle_flag().unwrap();
        s.navigate_to(2, fixed_now()).unwrap();

        let handle = s.reset_progress(fixed_now()).unwrap();
        assert!(handle.is_some());
        assert_eq!(s.current_index(), 0);
        assert_eq!(s.score(), 0);
        assert_eq!(s.answered_count(), 0);
        assert_eq!(s.flagged_count(), 0);
        assert_eq!(s.selection(), None);
        assert_eq!(s.timer().remaining(), 20);
    }

    #[test]
    fn mixed_session_aggregates_once() {
        let questions = vec![question(1, 0), question(2, 0), question(3, 0)];
        let mut s = Session::new(
            SessionId::new("mixed"),
            questions,
            SessionTimer::disabled(),
            fixed_now(),
        )
        .unwrap();

        s.select_answer(0).unwrap();
        s.submit_answer(fixed_now()).unwrap();
        s.next_question(fixed_now()).unwrap();
        s.select_answer(1).unwrap();
        s.submit_answer(fixed_now()).unwrap();
        s.next_question(fixed_now()).unwrap();
        assert_eq!(s.next_question(fixed_now()).unwrap(), Advance::Completed);
        assert_invariants(&s);

        let first = s.finalize(fixed_now()).clone();
        assert_eq!(first.final_score(), 1);
        assert_eq!(first.total_questions(), 3);
        assert!((first.accuracy() - 50.0).abs() < f64::EPSILON);

        let later = fixed_now() + Duration::minutes(5);
        let second = s.finalize(later).clone();
        assert_eq!(first, second);
        assert_eq!(second.completed_at(), fixed_now());
    }

    #[test]
    fn finalize_without_answers_has_zero_accuracy() {
        let mut s = session(2, SessionTimer::disabled());
        let result = s.finalize(fixed_now());
        assert_eq!(result.accuracy(), 0.0);
        assert!(!result.achievements().all_answered);
        assert!(s.is_complete());
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use prep_core::model::{Question, QuestionDraft, QuestionId, QuestionKind, TopicId, UserId};
use prep_core::time::fixed_clock;
use services::{
    EnginePhase, NextOutcome, Notice, SessionCriteria, SessionEngine, SessionError,
    SessionSettings, TickResult, TimerTick,
};
use storage::InMemoryRepository;
use storage::repository::{
    AnswerEvent, CompleteSession, ProgressTracker, SessionCompletion, SessionStore, StartSession,
    Storage, StorageError,
};

fn plain(id: u64, correct: i64) -> Question {
    QuestionDraft::new(
        id,
        QuestionKind::Vocabulary,
        format!("Q{id}"),
        ["a", "b", "c", "d"],
        correct,
    )
    .validate()
    .unwrap()
}

fn reading(id: u64, passage: &str) -> Question {
    QuestionDraft::new(
        id,
        QuestionKind::ReadingComprehension,
        format!("R{id}"),
        ["a", "b", "c", "d"],
        0,
    )
    .with_topic("reading")
    .with_passage_text(passage)
    .validate()
    .unwrap()
}

fn user() -> UserId {
    UserId::new("learner")
}

fn engine_over(storage: &Storage, settings: SessionSettings) -> SessionEngine {
    SessionEngine::new(user(), settings, storage).with_clock(fixed_clock())
}

fn timed(seconds: u32) -> SessionSettings {
    SessionSettings::default()
        .with_seconds_per_question(seconds)
        .unwrap()
}

struct OfflineTracker;

#[async_trait]
impl ProgressTracker for OfflineTracker {
    async fn record_answer(&self, _event: &AnswerEvent) -> Result<(), StorageError> {
        Err(StorageError::Connection("offline".into()))
    }
}

/// Session store whose first `failures` completion calls time out.
struct FlakyStore {
    inner: InMemoryRepository,
    failures: AtomicUsize,
    completions: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: InMemoryRepository, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            completions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn start_session(
        &self,
        request: &StartSession,
    ) -> Result<prep_core::model::SessionId, StorageError> {
        self.inner.start_session(request).await
    }

    async fn complete_session(
        &self,
        request: &CompleteSession,
    ) -> Result<SessionCompletion, StorageError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Timeout);
        }
        self.inner.complete_session(request).await
    }
}

#[tokio::test]
async fn mixed_answers_aggregate_over_answered_questions() {
    let repo = InMemoryRepository::with_questions(vec![plain(1, 0), plain(2, 0), plain(3, 0)]);
    let storage = Storage::from_repository(repo.clone());
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    engine.initialize(SessionCriteria::default()).await.unwrap();
    assert_eq!(engine.phase(), EnginePhase::Ready);

    engine.select_answer(0).unwrap();
    assert!(engine.submit_answer().unwrap().is_correct);
    engine.next_question().await.unwrap();
    engine.select_answer(2).unwrap();
    assert!(!engine.submit_answer().unwrap().is_correct);
    engine.next_question().await.unwrap();

    let NextOutcome::Completed(result) = engine.next_question().await.unwrap() else {
        panic!("expected completion from the last question");
    };
    assert_eq!(result.final_score(), 1);
    assert_eq!(result.total_questions(), 3);
    assert!((result.accuracy() - 50.0).abs() < f64::EPSILON);
    assert!(engine.is_complete());
    assert!(engine.is_completion_reported());

    engine.flush_reports().await;
    assert_eq!(repo.answers_for(&user()).unwrap().len(), 2);
    let completion = repo.completion(result.session_id()).unwrap().unwrap();
    assert_eq!(completion.final_score, 1);

    assert_eq!(
        engine.next_question().await,
        Err(SessionError::SessionAlreadyComplete)
    );
    assert_eq!(engine.toggle_flag(), Err(SessionError::SessionAlreadyComplete));
}

#[tokio::test(start_paused = true)]
async fn timeout_submits_without_selection() {
    let storage = Storage::in_memory(vec![plain(1, 0), plain(2, 0)]);
    let mut engine = engine_over(&storage, timed(10));
    engine.initialize(SessionCriteria::default()).await.unwrap();

    for expected in (1..10).rev() {
        let tick = engine.next_tick().await.unwrap();
        assert_eq!(
            engine.handle_tick(tick).await.unwrap(),
            TickResult::Counting {
                remaining: expected
            }
        );
    }
    let tick = engine.next_tick().await.unwrap();
    let TickResult::Expired {
        submitted: Some(submitted),
        advanced: None,
    } = engine.handle_tick(tick).await.unwrap()
    else {
        panic!("expected an automatic submit");
    };
    assert!(submitted.timed_out);
    assert_eq!(submitted.selected, None);
    assert!(engine.live_timer().is_none());

    let progress = engine.progress().unwrap();
    assert_eq!(progress.answered, 1);
    assert_eq!(progress.score, 0);

    assert_eq!(
        engine.next_question().await.unwrap(),
        NextOutcome::Moved { index: 1 }
    );
    assert!(engine.live_timer().is_some());
}

#[tokio::test(start_paused = true)]
async fn auto_advance_runs_through_the_session() {
    let storage = Storage::in_memory(vec![plain(1, 0), plain(2, 0)]);
    let mut engine = engine_over(&storage, timed(5).with_auto_advance(true));
    engine.initialize(SessionCriteria::default()).await.unwrap();

    let mut outcomes = Vec::new();
    while !engine.is_complete() {
        let tick = engine.next_tick().await.unwrap();
        if let TickResult::Expired { advanced, .. } = engine.handle_tick(tick).await.unwrap() {
            outcomes.push(advanced.unwrap());
        }
    }

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], NextOutcome::Moved { index: 1 });
    let NextOutcome::Completed(result) = &outcomes[1] else {
        panic!("expected completion after the last timeout");
    };
    assert_eq!(result.answered(), 2);
    assert_eq!(result.final_score(), 0);
}

#[tokio::test]
async fn empty_pool_reports_no_questions() {
    let storage = Storage::in_memory(Vec::new());
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    assert_eq!(
        engine.initialize(SessionCriteria::default()).await,
        Err(SessionError::NoQuestionsAvailable)
    );
    assert_ne!(engine.phase(), EnginePhase::Ready);
    assert!(engine.session().is_none());
}

#[tokio::test]
async fn passage_questions_stay_together() {
    let mut questions: Vec<Question> = (1..=5).map(|id| reading(id, "Tide pools")).collect();
    questions.extend((11..=15).map(|id| plain(id, 0)));
    let storage = Storage::in_memory(questions);
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    engine
        .initialize(SessionCriteria {
            topic_id: Some(TopicId::new("reading")),
            ..SessionCriteria::default()
        })
        .await
        .unwrap();

    let positions: Vec<usize> = engine
        .session()
        .unwrap()
        .questions()
        .iter()
        .enumerate()
        .filter(|(_, q)| q.is_reading())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(positions.len(), 5);
    assert_eq!(positions[4] - positions[0], 4);
    assert_eq!(engine.session().unwrap().len(), 10);
}

#[tokio::test]
async fn failed_answer_report_is_non_fatal() {
    let repo = InMemoryRepository::with_questions(vec![plain(1, 0), plain(2, 0)]);
    let storage = Storage {
        progress: Arc::new(OfflineTracker),
        ..Storage::from_repository(repo)
    };
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    engine.initialize(SessionCriteria::default()).await.unwrap();

    engine.select_answer(0).unwrap();
    engine.submit_answer().unwrap();

    let notice = engine.next_notice().await.unwrap();
    assert_eq!(
        notice,
        Notice::ReportFailed {
            question_id: QuestionId::new(1),
            error: SessionError::Network("offline".into()),
        }
    );
    assert_eq!(engine.progress().unwrap().score, 1);
    assert!(engine.try_notice().is_none());

    engine.next_question().await.unwrap();
    assert_eq!(engine.progress().unwrap().current_index, 1);
}

#[tokio::test]
async fn completion_failure_keeps_local_result_and_retries_once() {
    let repo = InMemoryRepository::with_questions(vec![plain(1, 0)]);
    let store = Arc::new(FlakyStore::new(repo.clone(), 1));
    let storage = Storage {
        sessions: store.clone(),
        ..Storage::from_repository(repo.clone())
    };
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    engine.initialize(SessionCriteria::default()).await.unwrap();
    engine.select_answer(0).unwrap();
    engine.submit_answer().unwrap();

    let err = engine.next_question().await.unwrap_err();
    assert!(matches!(err, SessionError::Network(_)));
    assert!(err.is_retryable());
    assert!(engine.is_complete());
    assert!(!engine.is_completion_reported());
    let local = engine.session().unwrap().result().unwrap().clone();

    let retried = engine.retry_completion().await.unwrap();
    assert_eq!(retried, local);
    assert!(engine.is_completion_reported());

    let again = engine.finalize().await.unwrap();
    assert_eq!(again, local);
    assert_eq!(store.completions.load(Ordering::SeqCst), 2);
    assert!(repo.completion(local.session_id()).unwrap().is_some());
}

#[tokio::test]
async fn retry_without_completed_session_is_rejected() {
    let storage = Storage::in_memory(vec![plain(1, 0)]);
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    engine.initialize(SessionCriteria::default()).await.unwrap();
    assert_eq!(
        engine.retry_completion().await,
        Err(SessionError::SessionNotFound)
    );
}

#[tokio::test(start_paused = true)]
async fn navigation_keeps_a_single_countdown() {
    let storage = Storage::in_memory(vec![plain(1, 0), plain(2, 0), plain(3, 0)]);
    let mut engine = engine_over(&storage, timed(30));
    engine.initialize(SessionCriteria::default()).await.unwrap();
    let first = engine.live_timer().unwrap();
    let session_id = engine.session().unwrap().id().clone();

    engine.navigate_to(2).unwrap();
    engine.navigate_to(1).unwrap();
    engine.toggle_flag().unwrap();
    let live = engine.live_timer().unwrap();
    assert_ne!(first, live);
    assert_eq!(engine.session().unwrap().timer().live_handle(), Some(live));

    let stale = TimerTick {
        session_id: session_id.clone(),
        handle: first,
    };
    assert_eq!(engine.handle_tick(stale).await.unwrap(), TickResult::Ignored);

    for _ in 0..3 {
        let tick = engine.next_tick().await.unwrap();
        assert_eq!(tick.handle, live);
        engine.handle_tick(tick).await.unwrap();
    }
    assert_eq!(engine.progress().unwrap().time_remaining, Some(27));

    engine.navigate_to(0).unwrap();
    assert_eq!(engine.progress().unwrap().time_remaining, Some(30));
}

#[tokio::test(start_paused = true)]
async fn tick_from_a_previous_session_is_ignored() {
    let storage = Storage::in_memory(vec![plain(1, 0), plain(2, 0)]);
    let mut engine = engine_over(&storage, timed(10));
    engine.initialize(SessionCriteria::default()).await.unwrap();
    let old = TimerTick {
        session_id: engine.session().unwrap().id().clone(),
        handle: engine.live_timer().unwrap(),
    };

    engine.initialize(SessionCriteria::default()).await.unwrap();
    let session_id = engine.session().unwrap().id().clone();
    assert_ne!(session_id, old.session_id);
    // fresh timers number their handles from the start again
    assert_eq!(engine.live_timer(), Some(old.handle));

    assert_eq!(engine.handle_tick(old).await.unwrap(), TickResult::Ignored);
    assert_eq!(engine.progress().unwrap().time_remaining, Some(10));

    let tick = engine.next_tick().await.unwrap();
    assert_eq!(tick.session_id, session_id);
    assert_eq!(
        engine.handle_tick(tick).await.unwrap(),
        TickResult::Counting { remaining: 9 }
    );
}

#[tokio::test]
async fn reported_answer_carries_time_spent() {
    let repo = InMemoryRepository::with_questions(vec![plain(1, 0), plain(2, 0)]);
    let storage = Storage::from_repository(repo.clone());
    let mut engine = engine_over(&storage, SessionSettings::untimed());
    engine.initialize(SessionCriteria::default()).await.unwrap();

    engine.advance_clock(chrono::Duration::seconds(7));
    engine.select_answer(0).unwrap();
    assert_eq!(engine.submit_answer().unwrap().time_spent_secs, 7);

    engine.next_question().await.unwrap();
    engine.advance_clock(chrono::Duration::seconds(4));
    engine.select_answer(1).unwrap();
    assert_eq!(engine.submit_answer().unwrap().time_spent_secs, 4);

    engine.flush_reports().await;
    let mut spent: Vec<u32> = repo
        .answers_for(&user())
        .unwrap()
        .iter()
        .map(|event| event.time_spent_secs)
        .collect();
    spent.sort_unstable();
    assert_eq!(spent, vec![4, 7]);
}

#[tokio::test(start_paused = true)]
async fn reset_restarts_from_the_first_question() {
    let storage = Storage::in_memory(vec![plain(1, 0), plain(2, 0)]);
    let mut engine = engine_over(&storage, timed(20));
    engine.initialize(SessionCriteria::default()).await.unwrap();
    engine.select_answer(0).unwrap();
    engine.submit_answer().unwrap();
    engine.toggle_flag().unwrap();
    engine.next_question().await.unwrap();

    engine.reset_progress().unwrap();
    let progress = engine.progress().unwrap();
    assert_eq!(progress.current_index, 0);
    assert_eq!(progress.answered, 0);
    assert_eq!(progress.flagged, 0);
    assert_eq!(progress.score, 0);
    assert_eq!(progress.time_remaining, Some(20));
    assert!(engine.navigator().iter().all(|item| !item.flagged));
}

use prep_core::model::{QuestionId, QuestionStatus, Session};
use serde::Serialize;

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub flagged: usize,
    pub remaining: usize,
    pub current_index: usize,
    pub score: u32,
    /// Seconds left on the live countdown, if one is running.
    pub time_remaining: Option<u32>,
    pub is_complete: bool,
}

impl SessionProgress {
    #[must_use]
    pub fn of(session: &Session) -> Self {
        let total = session.len();
        let answered = session.answered_count();
        let timer = session.timer();
        Self {
            total,
            answered,
            flagged: session.flagged_count(),
            remaining: total.saturating_sub(answered),
            current_index: session.current_index(),
            score: session.score(),
            time_remaining: timer.is_active().then(|| timer.remaining()),
            is_complete: session.is_complete(),
        }
    }
}

/// One cell of a question navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorItem {
    pub index: usize,
    pub question_id: QuestionId,
    pub status: QuestionStatus,
    pub flagged: bool,
    pub is_current: bool,
}

#[must_use]
pub fn navigator(session: &Session) -> Vec<NavigatorItem> {
    session
        .questions()
        .iter()
        .enumerate()
        .map(|(index, question)| NavigatorItem {
            index,
            question_id: question.id(),
            status: session.status(index),
            flagged: session.is_flagged(index),
            is_current: index == session.current_index(),
        })
        .collect()
}

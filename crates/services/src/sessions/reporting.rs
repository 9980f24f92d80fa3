use std::sync::Arc;

use prep_core::model::QuestionId;
use storage::repository::{AnswerEvent, ProgressTracker};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SessionError;

/// Out-of-band events the engine surfaces to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Notice {
    /// A background answer report failed. The local session state is unaffected.
    ReportFailed {
        question_id: QuestionId,
        error: SessionError,
    },
}

/// Send `event` to the tracker on a detached task.
///
/// Failures are logged and forwarded as `Notice::ReportFailed`; nothing is returned
/// to the caller that spawned the report.
pub(crate) fn spawn_answer_report(
    tracker: Arc<dyn ProgressTracker>,
    event: AnswerEvent,
    notices: mpsc::UnboundedSender<Notice>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tracker.record_answer(&event).await {
            Ok(()) => debug!(question_id = %event.question_id, "answer recorded"),
            Err(err) => {
                warn!(
                    question_id = %event.question_id,
                    session_id = %event.session_id,
                    error = %err,
                    "failed to record answer"
                );
                let _ = notices.send(Notice::ReportFailed {
                    question_id: event.question_id,
                    error: err.into(),
                });
            }
        }
    })
}

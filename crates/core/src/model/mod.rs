mod ids;
mod question;
mod result;
mod session;

pub use ids::{ParseIdError, QuestionId, SessionId, TopicId, UserId};
pub use question::{
    Difficulty, OPTION_COUNT, Passage, PassageKey, PassageLine, Question, QuestionDraft,
    QuestionError, QuestionKind,
};
pub use result::{
    Achievements, PerformanceBand, SessionResult, SessionTally, has_no_flags, is_all_answered,
    is_perfect_score,
};
pub use session::{
    Advance, AnswerRecord, QuestionStatus, Session, SessionStateError, SubmittedAnswer,
    TickEffect,
};

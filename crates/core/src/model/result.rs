use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ids::SessionId;

//
// ─── PERFORMANCE BANDS ─────────────────────────────────────────────────────────
//

/// Presentational classification of a session's accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceBand {
    Excellent,
    VeryGood,
    Good,
    Fair,
    NeedsPractice,
}

impl PerformanceBand {
    /// Bands in descending order of their lower bound.
    pub const ORDERED: [PerformanceBand; 5] = [
        PerformanceBand::Excellent,
        PerformanceBand::VeryGood,
        PerformanceBand::Good,
        PerformanceBand::Fair,
        PerformanceBand::NeedsPractice,
    ];

    /// Inclusive lower bound of the band, in percent.
    #[must_use]
    pub fn min_accuracy(self) -> f64 {
        match self {
            PerformanceBand::Excellent => 90.0,
            PerformanceBand::VeryGood => 80.0,
            PerformanceBand::Good => 70.0,
            PerformanceBand::Fair => 60.0,
            PerformanceBand::NeedsPractice => 0.0,
        }
    }

    #[must_use]
    pub fn from_accuracy(accuracy: f64) -> Self {
        Self::ORDERED
            .into_iter()
            .find(|band| accuracy >= band.min_accuracy())
            .unwrap_or(PerformanceBand::NeedsPractice)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            PerformanceBand::Excellent => "Excellent",
            PerformanceBand::VeryGood => "Very good",
            PerformanceBand::Good => "Good",
            PerformanceBand::Fair => "Fair",
            PerformanceBand::NeedsPractice => "Needs practice",
        }
    }
}

//
// ─── ACHIEVEMENTS ──────────────────────────────────────────────────────────────
//

/// Every question in the session was answered correctly.
#[must_use]
pub fn is_perfect_score(score: u32, total: u32) -> bool {
    total > 0 && score == total
}

/// No question was left unanswered.
#[must_use]
pub fn is_all_answered(answered: u32, total: u32) -> bool {
    total > 0 && answered == total
}

/// Nothing was left marked for review.
#[must_use]
pub fn has_no_flags(flagged: u32) -> bool {
    flagged == 0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Achievements {
    pub perfect_score: bool,
    pub all_answered: bool,
    pub no_flags: bool,
}

impl Achievements {
    #[must_use]
    pub fn evaluate(tally: &SessionTally) -> Self {
        Self {
            perfect_score: is_perfect_score(tally.score, tally.total),
            all_answered: is_all_answered(tally.answered, tally.total),
            no_flags: has_no_flags(tally.flagged),
        }
    }

    /// Number of earned achievements.
    #[must_use]
    pub fn count(&self) -> usize {
        [self.perfect_score, self.all_answered, self.no_flags]
            .into_iter()
            .filter(|earned| *earned)
            .count()
    }
}

//
// ─── RESULT ────────────────────────────────────────────────────────────────────
//

/// Final counters of a session, the only input of the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTally {
    pub score: u32,
    pub answered: u32,
    pub total: u32,
    pub flagged: u32,
}

impl SessionTally {
    /// Accuracy over answered questions, in percent. Zero when nothing was answered.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        f64::from(self.score) / f64::from(self.answered.max(1)) * 100.0
    }
}

/// Immutable outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    session_id: SessionId,
    final_score: u32,
    total_questions: u32,
    answered: u32,
    flagged: u32,
    accuracy: f64,
    band: PerformanceBand,
    achievements: Achievements,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl SessionResult {
    #[must_use]
    pub fn from_tally(
        session_id: SessionId,
        tally: SessionTally,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let accuracy = tally.accuracy();
        Self {
            session_id,
            final_score: tally.score,
            total_questions: tally.total,
            answered: tally.answered,
            flagged: tally.flagged,
            accuracy,
            band: PerformanceBand::from_accuracy(accuracy),
            achievements: Achievements::evaluate(&tally),
            started_at,
            completed_at,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn final_score(&self) -> u32 {
        self.final_score
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn answered(&self) -> u32 {
        self.answered
    }

    #[must_use]
    pub fn flagged(&self) -> u32 {
        self.flagged
    }

    #[must_use]
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    #[must_use]
    pub fn band(&self) -> PerformanceBand {
        self.band
    }

    #[must_use]
    pub fn achievements(&self) -> Achievements {
        self.achievements
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

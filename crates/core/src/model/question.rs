use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{QuestionId, TopicId};

/// Number of answer options every question carries.
pub const OPTION_COUNT: usize = 4;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("expected exactly 4 options, found {found}")]
    OptionCount { found: usize },

    #[error("option {index} cannot be empty")]
    EmptyOption { index: usize },

    #[error("correct answer {value} is outside 0..=3")]
    CorrectAnswerOutOfRange { value: i64 },

    #[error("passage line numbers must be strictly increasing (line {line})")]
    UnorderedPassageLines { line: u32 },
}

//
// ─── KINDS ─────────────────────────────────────────────────────────────────────
//

/// Closed set of question kinds. Determines layout and grouping eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    #[serde(alias = "reading_comprehension")]
    ReadingComprehension,
    #[serde(alias = "sentence_completion")]
    SentenceCompletion,
    Restatement,
    Vocabulary,
}

impl QuestionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::ReadingComprehension => "reading-comprehension",
            QuestionKind::SentenceCompletion => "sentence-completion",
            QuestionKind::Restatement => "restatement",
            QuestionKind::Vocabulary => "vocabulary",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "reading-comprehension" => Some(Self::ReadingComprehension),
            "sentence-completion" => Some(Self::SentenceCompletion),
            "restatement" => Some(Self::Restatement),
            "vocabulary" => Some(Self::Vocabulary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

//
// ─── PASSAGE ───────────────────────────────────────────────────────────────────
//

/// A numbered line of a reading passage, used for line-anchored references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassageLine {
    pub line_number: u32,
    pub text: String,
}

/// A field on which two passages can match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PassageKey<'a> {
    Body(Cow<'a, str>),
    Title(&'a str),
}

/// Shared source passage of a reading-comprehension question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Passage {
    text: Option<String>,
    title: Option<String>,
    lines: Vec<PassageLine>,
}

impl Passage {
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    #[must_use]
    pub fn lines(&self) -> &[PassageLine] {
        &self.lines
    }

    /// Passage body: the text, else the numbered lines joined by newlines.
    #[must_use]
    pub fn body(&self) -> Option<Cow<'_, str>> {
        if let Some(text) = non_empty(self.text.as_deref()) {
            return Some(Cow::Borrowed(text));
        }
        if self.lines.is_empty() {
            return None;
        }
        let joined = self
            .lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Some(Cow::Owned(joined))
    }

    /// Keys two questions can share to belong to the same passage group.
    #[must_use]
    pub fn keys(&self) -> Vec<PassageKey<'_>> {
        let mut keys = Vec::with_capacity(2);
        if let Some(body) = self.body() {
            keys.push(PassageKey::Body(body));
        }
        if let Some(title) = non_empty(self.title.as_deref()) {
            keys.push(PassageKey::Title(title));
        }
        keys
    }

    fn is_empty(&self) -> bool {
        non_empty(self.text.as_deref()).is_none()
            && non_empty(self.title.as_deref()).is_none()
            && self.lines.is_empty()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Unvalidated question as it appears in a question bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: i64,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub topic_id: Option<TopicId>,
    #[serde(default)]
    pub category_id: Option<TopicId>,
    #[serde(default)]
    pub passage_text: Option<String>,
    /// Legacy spelling of `passageText` still found in older banks.
    #[serde(default)]
    pub passage: Option<String>,
    #[serde(default)]
    pub passage_title: Option<String>,
    #[serde(default)]
    pub passage_with_lines: Vec<PassageLine>,
}

impl QuestionDraft {
    /// Minimal draft without passage or topic data.
    pub fn new(
        id: u64,
        kind: QuestionKind,
        text: impl Into<String>,
        options: [&str; OPTION_COUNT],
        correct_answer: i64,
    ) -> Self {
        Self {
            id,
            kind,
            text: text.into(),
            options: options.iter().map(|s| (*s).to_owned()).collect(),
            correct_answer,
            explanation: None,
            difficulty: Difficulty::default(),
            topic_id: None,
            category_id: None,
            passage_text: None,
            passage: None,
            passage_title: None,
            passage_with_lines: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic_id = Some(TopicId::new(topic));
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category_id = Some(TopicId::new(category));
        self
    }

    #[must_use]
    pub fn with_passage_text(mut self, text: impl Into<String>) -> Self {
        self.passage_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_passage_title(mut self, title: impl Into<String>) -> Self {
        self.passage_title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Validate the draft into an immutable `Question`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` when the text is blank, the option list is not exactly
    /// four non-empty strings, the correct answer is outside `0..=3`, or passage lines
    /// are not numbered in increasing order.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }

        let found = self.options.len();
        let options: [String; OPTION_COUNT] = self
            .options
            .try_into()
            .map_err(|_| QuestionError::OptionCount { found })?;
        if let Some(index) = options.iter().position(|o| o.trim().is_empty()) {
            return Err(QuestionError::EmptyOption { index });
        }

        let correct_answer = u8::try_from(self.correct_answer)
            .ok()
            .filter(|v| usize::from(*v) < OPTION_COUNT)
            .ok_or(QuestionError::CorrectAnswerOutOfRange {
                value: self.correct_answer,
            })?;

        for pair in self.passage_with_lines.windows(2) {
            if pair[1].line_number <= pair[0].line_number {
                return Err(QuestionError::UnorderedPassageLines {
                    line: pair[1].line_number,
                });
            }
        }

        let passage = Passage {
            text: self
                .passage_text
                .filter(|s| !s.trim().is_empty())
                .or(self.passage),
            title: self.passage_title,
            lines: self.passage_with_lines,
        };

        Ok(Question {
            id: QuestionId::new(self.id),
            kind: self.kind,
            text: self.text,
            options,
            correct_answer,
            explanation: self.explanation.filter(|e| !e.trim().is_empty()),
            difficulty: self.difficulty,
            topic_id: self.topic_id,
            category_id: self.category_id,
            passage: (!passage.is_empty()).then_some(passage),
        })
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A single assessable item. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    kind: QuestionKind,
    text: String,
    options: [String; OPTION_COUNT],
    correct_answer: u8,
    explanation: Option<String>,
    difficulty: Difficulty,
    topic_id: Option<TopicId>,
    category_id: Option<TopicId>,
    passage: Option<Passage>,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[String; OPTION_COUNT] {
        &self.options
    }

    #[must_use]
    pub fn correct_answer(&self) -> u8 {
        self.correct_answer
    }

    #[must_use]
    pub fn is_correct(&self, selected: u8) -> bool {
        selected == self.correct_answer
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn topic_id(&self) -> Option<&TopicId> {
        self.topic_id.as_ref()
    }

    #[must_use]
    pub fn category_id(&self) -> Option<&TopicId> {
        self.category_id.as_ref()
    }

    #[must_use]
    pub fn passage(&self) -> Option<&Passage> {
        self.passage.as_ref()
    }

    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.kind == QuestionKind::ReadingComprehension
    }

    /// True when either the topic or the category of this question is `topic`.
    #[must_use]
    pub fn matches_topic(&self, topic: &TopicId) -> bool {
        self.topic_id.as_ref() == Some(topic) || self.category_id.as_ref() == Some(topic)
    }

    /// Looks up a numbered passage line for line-anchored references.
    #[must_use]
    pub fn line(&self, line_number: u32) -> Option<&PassageLine> {
        self.passage.as_ref().and_then(|p| {
            p.lines
                .binary_search_by_key(&line_number, |l| l.line_number)
                .ok()
                .map(|idx| &p.lines[idx])
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

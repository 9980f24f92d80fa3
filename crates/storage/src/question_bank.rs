//! Loading of static question banks stored as JSON.
//!
//! A bank is either a bare array of questions or an object with a `questions` array.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use prep_core::model::{Question, QuestionDraft, QuestionError};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuestionBankError {
    #[error("failed to read question bank {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] serde_json::Error),

    #[error("question {id} is invalid: {source}")]
    InvalidQuestion {
        id: u64,
        #[source]
        source: QuestionError,
    },

    #[error("question id {id} appears more than once")]
    DuplicateId { id: u64 },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BankFile {
    List(Vec<QuestionDraft>),
    Wrapped { questions: Vec<QuestionDraft> },
}

/// Parse and validate a bank from JSON text.
///
/// # Errors
///
/// Returns `QuestionBankError::Parse` for malformed JSON, `InvalidQuestion` when a draft
/// fails validation, or `DuplicateId` when two questions share an id.
pub fn parse_bank(json: &str) -> Result<Vec<Question>, QuestionBankError> {
    let drafts = match serde_json::from_str::<BankFile>(json)? {
        BankFile::List(drafts) | BankFile::Wrapped { questions: drafts } => drafts,
    };

    let mut seen = HashSet::with_capacity(drafts.len());
    let mut questions = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let id = draft.id;
        if !seen.insert(id) {
            return Err(QuestionBankError::DuplicateId { id });
        }
        let question = draft
            .validate()
            .map_err(|source| QuestionBankError::InvalidQuestion { id, source })?;
        questions.push(question);
    }
    Ok(questions)
}

/// Read and validate a bank file.
///
/// # Errors
///
/// Returns `QuestionBankError::Io` if the file cannot be read, otherwise as `parse_bank`.
pub fn load_bank(path: impl AsRef<Path>) -> Result<Vec<Question>, QuestionBankError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| QuestionBankError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bank(&json)
}

#![forbid(unsafe_code)]

pub mod memory;
pub mod question_bank;
pub mod repository;

pub use memory::InMemoryRepository;
pub use question_bank::{QuestionBankError, load_bank, parse_bank};

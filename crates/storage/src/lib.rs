#![forbid(unsafe_code)]

pub mod http;
pub mod memory;
pub mod repository;

pub use memory::{AssessmentTemplate, Fault, InMemoryStore, StoreOperation};
pub use repository::{
    AnswerRepository, AttemptRepository, QuestionRepository, RemoteStore, StorageError,
};

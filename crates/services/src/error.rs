//! Shared error types for the services crate.

use thiserror::Error;

use assess_core::elapsed::SyncPolicyError;
use assess_core::model::{AlternativeId, QuestionId};
use storage::repository::StorageError;

use crate::sessions::{FailureKind, StateTag};

/// Errors emitted by the attempt session and its controller.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session is {state}, not answering")]
    NotAnswering { state: StateTag },
    #[error("session is already {state}")]
    AlreadyInitialized { state: StateTag },
    #[error("initialization already in flight")]
    InitializationInFlight,
    #[error("finalize already in flight")]
    FinalizeInFlight,
    #[error("session failure is not retryable: {0}")]
    NotRetryable(FailureKind),
    #[error("question {0} is not part of this attempt")]
    UnknownQuestion(QuestionId),
    #[error("question {0} does not take this kind of answer")]
    AnswerKindMismatch(QuestionId),
    #[error("question {question} has no alternative {alternative}")]
    UnknownAlternative {
        question: QuestionId,
        alternative: AlternativeId,
    },
    #[error("no question at position {0}")]
    InvalidPosition(usize),
    #[error("attempt has no essay slot")]
    NoEssay,
    #[error("nothing entered for question {0}")]
    NothingToSave(QuestionId),
    #[error("session was torn down")]
    TornDown,
    #[error("result belongs to a superseded operation")]
    Superseded,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while reading session configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be a whole number of seconds, got {raw:?}")]
    InvalidNumber { var: &'static str, raw: String },
    #[error(transparent)]
    Policy(#[from] SyncPolicyError),
}

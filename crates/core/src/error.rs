use thiserror::Error;

use crate::elapsed::SyncPolicyError;
use crate::model::{AttemptError, QuestionError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    SyncPolicy(#[from] SyncPolicyError),
}

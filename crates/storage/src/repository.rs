use async_trait::async_trait;
use assess_core::model::{
    AnswerValue, AssessmentGroupId, AssessmentId, Attempt, AttemptId, ExamUnitId, Question,
    QuestionId, UserId,
};
use std::sync::Arc;
use thiserror::Error;

use crate::http::{HttpConfigError, HttpStore, HttpStoreConfig};
use crate::memory::InMemoryStore;

/// Errors surfaced by remote store adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("attempt already finished")]
    AttemptFinished,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("remote store responded with status {0}")]
    Http(u16),
}

impl From<assess_core::Error> for StorageError {
    fn from(err: assess_core::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Attempt lifecycle: lookup, lazy creation, elapsed time and finalization.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// All attempts of `user` within an assessment group.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or the payload is invalid.
    async fn fetch_attempts_for_user(
        &self,
        group: AssessmentGroupId,
        user: UserId,
    ) -> Result<Vec<Attempt>, StorageError>;

    /// Create the attempt for `(user, assessment)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if one already exists; callers re-fetch.
    async fn create_attempt(
        &self,
        user: UserId,
        assessment: AssessmentId,
    ) -> Result<Attempt, StorageError>;

    /// Overwrite the cumulative elapsed time in seconds.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AttemptFinished` once the attempt is closed.
    async fn push_elapsed_time(&self, attempt: AttemptId, secs: u64) -> Result<(), StorageError>;

    /// Close the attempt and return the final record, including score.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport failures or if the attempt is missing.
    async fn finish_attempt(&self, attempt: AttemptId) -> Result<Attempt, StorageError>;
}

#[async_trait]
pub trait AnswerRepository: Send + Sync {
    /// Write one question's answer.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AttemptFinished` once the attempt is closed.
    async fn submit_answer(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        value: &AnswerValue,
    ) -> Result<(), StorageError>;

    /// Write the essay text for the unit carrying the essay slot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AttemptFinished` once the attempt is closed.
    async fn submit_essay(
        &self,
        attempt: AttemptId,
        exam_unit: ExamUnitId,
        text: &str,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Questions of one exam unit. Callers sort by `order`; arrival order means nothing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or the payload is invalid.
    async fn fetch_questions(&self, exam_unit: ExamUnitId) -> Result<Vec<Question>, StorageError>;
}

/// Aggregates the remote store contracts behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct RemoteStore {
    pub attempts: Arc<dyn AttemptRepository>,
    pub answers: Arc<dyn AnswerRepository>,
    pub questions: Arc<dyn QuestionRepository>,
}

impl RemoteStore {
    /// Wrap an in-memory store; clones share the same data.
    #[must_use]
    pub fn in_memory(store: &InMemoryStore) -> Self {
        Self {
            attempts: Arc::new(store.clone()),
            answers: Arc::new(store.clone()),
            questions: Arc::new(store.clone()),
        }
    }

    /// Build a store that talks to the remote attempt service over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError` if the HTTP client cannot be constructed.
    pub fn http(config: HttpStoreConfig) -> Result<Self, HttpConfigError> {
        let store = Arc::new(HttpStore::new(config)?);
        Ok(Self {
            attempts: Arc::clone(&store) as Arc<dyn AttemptRepository>,
            answers: Arc::clone(&store) as Arc<dyn AnswerRepository>,
            questions: store,
        })
    }
}

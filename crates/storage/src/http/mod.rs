use std::env;
use std::time::Duration;

use async_trait::async_trait;
use assess_core::model::{
    AnswerValue, AssessmentGroupId, AssessmentId, Attempt, AttemptId, ExamUnitId, Question,
    QuestionId, UserId,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use thiserror::Error;
use url::Url;

use crate::repository::{AnswerRepository, AttemptRepository, QuestionRepository, StorageError};

mod mapping;

use mapping::{AnswerRequest, CreateAttemptRequest, ElapsedTimeRequest, EssayRequest};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl HttpStoreConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Parse a base url string.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError::InvalidUrl` when the string is not an absolute url.
    pub fn parse(base_url: &str) -> Result<Self, HttpConfigError> {
        Ok(Self::new(Url::parse(base_url.trim())?))
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Read `ASSESS_API_URL`, `ASSESS_API_TOKEN` and `ASSESS_API_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError` if the url is missing or malformed, or the
    /// timeout is not a positive integer.
    pub fn from_env() -> Result<Self, HttpConfigError> {
        let raw =
            env::var("ASSESS_API_URL").map_err(|_| HttpConfigError::Missing("ASSESS_API_URL"))?;
        let mut config = Self::parse(&raw)?;
        config.api_token = env::var("ASSESS_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        if let Ok(raw) = env::var("ASSESS_API_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(HttpConfigError::InvalidTimeout(raw))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Remote attempt store spoken to over JSON/HTTP.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    config: HttpStoreConfig,
}

impl HttpStore {
    /// # Errors
    ///
    /// Returns `HttpConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: HttpStoreConfig) -> Result<Self, HttpConfigError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, StorageError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "remote store rejected request");
            return Err(classify(status));
        }
        response
            .text()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

/// Map a non-success status to the store's error vocabulary.
fn classify(status: StatusCode) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound,
        StatusCode::CONFLICT => StorageError::Conflict,
        StatusCode::LOCKED => StorageError::AttemptFinished,
        other => StorageError::Http(other.as_u16()),
    }
}

#[async_trait]
impl AttemptRepository for HttpStore {
    async fn fetch_attempts_for_user(
        &self,
        group: AssessmentGroupId,
        user: UserId,
    ) -> Result<Vec<Attempt>, StorageError> {
        let url = self.url(&format!("assessment-groups/{group}/users/{user}/attempts"));
        let body = self.send(self.client.get(url)).await?;
        mapping::parse_attempts(&body)
    }

    async fn create_attempt(
        &self,
        user: UserId,
        assessment: AssessmentId,
    ) -> Result<Attempt, StorageError> {
        let payload = CreateAttemptRequest {
            user_id: user.value(),
            assessment_id: assessment.value(),
        };
        let body = self
            .send(self.client.post(self.url("attempts")).json(&payload))
            .await?;
        mapping::parse_attempt(&body)
    }

    async fn push_elapsed_time(&self, attempt: AttemptId, secs: u64) -> Result<(), StorageError> {
        let payload = ElapsedTimeRequest { elapsed_time: secs };
        let url = self.url(&format!("attempts/{attempt}/elapsed-time"));
        self.send(self.client.put(url).json(&payload)).await?;
        Ok(())
    }

    async fn finish_attempt(&self, attempt: AttemptId) -> Result<Attempt, StorageError> {
        let url = self.url(&format!("attempts/{attempt}/finish"));
        let body = self.send(self.client.post(url)).await?;
        mapping::parse_attempt(&body)
    }
}

#[async_trait]
impl AnswerRepository for HttpStore {
    async fn submit_answer(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        value: &AnswerValue,
    ) -> Result<(), StorageError> {
        let url = self.url(&format!("attempts/{attempt}/answers/{question}"));
        let payload = AnswerRequest::from_value(value);
        self.send(self.client.put(url).json(&payload)).await?;
        Ok(())
    }

    async fn submit_essay(
        &self,
        attempt: AttemptId,
        exam_unit: ExamUnitId,
        text: &str,
    ) -> Result<(), StorageError> {
        let url = self.url(&format!("attempts/{attempt}/essays/{exam_unit}"));
        self.send(self.client.put(url).json(&EssayRequest { text }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QuestionRepository for HttpStore {
    async fn fetch_questions(&self, exam_unit: ExamUnitId) -> Result<Vec<Question>, StorageError> {
        let url = self.url(&format!("exam-units/{exam_unit}/questions"));
        let body = self.send(self.client.get(url)).await?;
        mapping::parse_questions(&body)
    }
}

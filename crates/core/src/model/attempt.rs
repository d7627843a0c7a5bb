use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::answer::AnswerValue;
use crate::model::ids::{AssessmentId, AttemptId, ExamUnitId, QuestionId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("attempt {0} is already finished")]
    Finished(AttemptId),

    #[error("attempt {attempt} has no essay slot in exam unit {exam_unit}")]
    NoEssaySlot {
        attempt: AttemptId,
        exam_unit: ExamUnitId,
    },

    #[error("finished_at is before started_at")]
    InvalidTimeRange,
}

/// A named group of questions, optionally carrying the attempt's essay slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamUnit {
    pub id: ExamUnitId,
    pub name: String,
    pub has_essay: bool,
}

impl ExamUnit {
    #[must_use]
    pub fn new(id: ExamUnitId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            has_essay: false,
        }
    }

    #[must_use]
    pub fn with_essay(mut self) -> Self {
        self.has_essay = true;
        self
    }
}

/// An answer as recorded by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

/// Essay content as recorded by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEssay {
    pub exam_unit_id: ExamUnitId,
    pub text: String,
}

/// One user's attempt at one assessment; the authoritative remote record.
///
/// Once `finished_at` is set the attempt refuses every further mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    id: AttemptId,
    user_id: UserId,
    assessment_id: AssessmentId,
    duration_secs: u64,
    exam_units: Vec<ExamUnit>,
    elapsed_secs: u64,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    score: Option<f64>,
    answers: Vec<StoredAnswer>,
    essay: Option<StoredEssay>,
}

impl Attempt {
    /// Create a fresh, unfinished attempt with no answers.
    #[must_use]
    pub fn new(
        id: AttemptId,
        user_id: UserId,
        assessment_id: AssessmentId,
        duration_secs: u64,
        exam_units: Vec<ExamUnit>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            assessment_id,
            duration_secs,
            exam_units,
            elapsed_secs: 0,
            started_at,
            finished_at: None,
            score: None,
            answers: Vec::new(),
            essay: None,
        }
    }

    /// Rehydrate an attempt from a remote payload.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidTimeRange` if `finished_at` precedes `started_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: AttemptId,
        user_id: UserId,
        assessment_id: AssessmentId,
        duration_secs: u64,
        exam_units: Vec<ExamUnit>,
        elapsed_secs: u64,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        score: Option<f64>,
        answers: Vec<StoredAnswer>,
        essay: Option<StoredEssay>,
    ) -> Result<Self, AttemptError> {
        if finished_at.is_some_and(|at| at < started_at) {
            return Err(AttemptError::InvalidTimeRange);
        }
        Ok(Self {
            id,
            user_id,
            assessment_id,
            duration_secs,
            exam_units,
            elapsed_secs,
            started_at,
            finished_at,
            score,
            answers,
            essay,
        })
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn assessment_id(&self) -> AssessmentId {
        self.assessment_id
    }

    #[must_use]
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    #[must_use]
    pub fn exam_units(&self) -> &[ExamUnit] {
        &self.exam_units
    }

    /// The unit holding the essay slot, if any. Only the first flagged unit counts.
    #[must_use]
    pub fn essay_unit(&self) -> Option<ExamUnitId> {
        self.exam_units.iter().find(|u| u.has_essay).map(|u| u.id)
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    #[must_use]
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    #[must_use]
    pub fn answers(&self) -> &[StoredAnswer] {
        &self.answers
    }

    #[must_use]
    pub fn answer_for(&self, question: QuestionId) -> Option<&AnswerValue> {
        self.answers
            .iter()
            .find(|a| a.question_id == question)
            .map(|a| &a.value)
    }

    #[must_use]
    pub fn essay(&self) -> Option<&StoredEssay> {
        self.essay.as_ref()
    }

    fn ensure_open(&self) -> Result<(), AttemptError> {
        if self.is_finished() {
            return Err(AttemptError::Finished(self.id));
        }
        Ok(())
    }

    /// Record (or replace) the answer for a question.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Finished` once the attempt is finalized.
    pub fn record_answer(
        &mut self,
        question: QuestionId,
        value: AnswerValue,
    ) -> Result<(), AttemptError> {
        self.ensure_open()?;
        match self.answers.iter_mut().find(|a| a.question_id == question) {
            Some(existing) => existing.value = value,
            None => self.answers.push(StoredAnswer {
                question_id: question,
                value,
            }),
        }
        Ok(())
    }

    /// Replace the essay text.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Finished` once finalized, or `AttemptError::NoEssaySlot`
    /// if `exam_unit` is not the unit carrying the essay.
    pub fn record_essay(
        &mut self,
        exam_unit: ExamUnitId,
        text: impl Into<String>,
    ) -> Result<(), AttemptError> {
        self.ensure_open()?;
        if self.essay_unit() != Some(exam_unit) {
            return Err(AttemptError::NoEssaySlot {
                attempt: self.id,
                exam_unit,
            });
        }
        self.essay = Some(StoredEssay {
            exam_unit_id: exam_unit,
            text: text.into(),
        });
        Ok(())
    }

    /// Overwrite the cumulative elapsed time.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Finished` once the attempt is finalized.
    pub fn record_elapsed(&mut self, secs: u64) -> Result<(), AttemptError> {
        self.ensure_open()?;
        self.elapsed_secs = secs;
        Ok(())
    }

    /// Close the attempt. Subsequent mutations fail.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::Finished` if already finalized, or
    /// `AttemptError::InvalidTimeRange` if `at` precedes `started_at`.
    pub fn finish(&mut self, at: DateTime<Utc>, score: Option<f64>) -> Result<(), AttemptError> {
        self.ensure_open()?;
        if at < self.started_at {
            return Err(AttemptError::InvalidTimeRange);
        }
        self.finished_at = Some(at);
        self.score = score;
        Ok(())
    }
}

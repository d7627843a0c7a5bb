use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{AlternativeId, ExamUnitId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("objective question {0} has no alternatives")]
    NoAlternatives(QuestionId),

    #[error("objective question {question} repeats alternative {alternative}")]
    DuplicateAlternative {
        question: QuestionId,
        alternative: AlternativeId,
    },
}

//
// ─── ALTERNATIVES ──────────────────────────────────────────────────────────────
//

/// One selectable option of an objective question.
///
/// Correctness is never part of this type; it stays with the grading service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub id: AlternativeId,
    pub order: u32,
    pub text: String,
}

impl Alternative {
    #[must_use]
    pub fn new(id: AlternativeId, order: u32, text: impl Into<String>) -> Self {
        Self {
            id,
            order,
            text: text.into(),
        }
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// Whether a question is answered by picking an alternative or by writing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionKind {
    Objective { alternatives: Vec<Alternative> },
    OpenResponse,
}

/// A question as presented to the student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    exam_unit_id: ExamUnitId,
    order: u32,
    prompt: String,
    kind: QuestionKind,
}

impl Question {
    /// Build an objective question. Alternatives are sorted by their `order`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::NoAlternatives` if the list is empty, or
    /// `QuestionError::DuplicateAlternative` if an id repeats.
    pub fn objective(
        id: QuestionId,
        exam_unit_id: ExamUnitId,
        order: u32,
        prompt: impl Into<String>,
        mut alternatives: Vec<Alternative>,
    ) -> Result<Self, QuestionError> {
        if alternatives.is_empty() {
            return Err(QuestionError::NoAlternatives(id));
        }
        let mut seen = HashSet::with_capacity(alternatives.len());
        for alt in &alternatives {
            if !seen.insert(alt.id) {
                return Err(QuestionError::DuplicateAlternative {
                    question: id,
                    alternative: alt.id,
                });
            }
        }
        alternatives.sort_by_key(|alt| (alt.order, alt.id));

        Ok(Self {
            id,
            exam_unit_id,
            order,
            prompt: prompt.into(),
            kind: QuestionKind::Objective { alternatives },
        })
    }

    #[must_use]
    pub fn open_response(
        id: QuestionId,
        exam_unit_id: ExamUnitId,
        order: u32,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id,
            exam_unit_id,
            order,
            prompt: prompt.into(),
            kind: QuestionKind::OpenResponse,
        }
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn exam_unit_id(&self) -> ExamUnitId {
        self.exam_unit_id
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn kind(&self) -> &QuestionKind {
        &self.kind
    }

    #[must_use]
    pub fn is_objective(&self) -> bool {
        matches!(self.kind, QuestionKind::Objective { .. })
    }

    /// Alternatives in display order; empty for open-response questions.
    #[must_use]
    pub fn alternatives(&self) -> &[Alternative] {
        match &self.kind {
            QuestionKind::Objective { alternatives } => alternatives,
            QuestionKind::OpenResponse => &[],
        }
    }

    #[must_use]
    pub fn has_alternative(&self, alternative: AlternativeId) -> bool {
        self.alternatives().iter().any(|alt| alt.id == alternative)
    }
}

/// Sort questions for display by their explicit `order`, not by arrival position.
pub fn sort_for_display(questions: &mut [Question]) {
    questions.sort_by_key(|q| (q.order, q.id));
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use assess_core::model::{AlternativeId, AttemptId, ExamUnitId, QuestionId, SaveStatus};

use super::progress::SessionProgress;
use super::state::{Notice, SessionFailure, StateTag};

/// Everything the surrounding shell renders, captured at one instant.
///
/// Presentation-agnostic: the shell decides how to lay out and localize it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: StateTag,
    pub view: Option<CurrentView>,
    pub countdown: Option<Countdown>,
    pub progress: Option<SessionProgress>,
    pub notices: Vec<Notice>,
    pub failure: Option<SessionFailure>,
    pub result: Option<FinalResult>,
}

/// The answer panel currently rendered and editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CurrentView {
    Question(QuestionView),
    Essay(EssayView),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    /// Zero-based position in display order.
    pub position: usize,
    pub total: usize,
    pub question_id: QuestionId,
    pub exam_unit_id: ExamUnitId,
    pub prompt: String,
    /// Empty for open-response questions.
    pub alternatives: Vec<AlternativeView>,
    /// Local text of an open-response answer.
    pub text: Option<String>,
    pub status: SaveStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlternativeView {
    pub id: AlternativeId,
    pub text: String,
    pub selected: bool,
    /// Selected and acknowledged by the store.
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EssayView {
    pub exam_unit_id: ExamUnitId,
    pub unit_name: String,
    pub text: String,
    pub status: SaveStatus,
}

/// Remaining time derived from the synchronizer, clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub remaining_secs: u64,
}

impl Countdown {
    #[must_use]
    pub fn new(remaining_secs: u64) -> Self {
        Self { remaining_secs }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }
}

/// `MM:SS`, or `H:MM:SS` from one hour up.
impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.remaining_secs / 3600;
        let minutes = (self.remaining_secs % 3600) / 60;
        let seconds = self.remaining_secs % 60;
        if hours > 0 {
            write!(f, "{hours}:{minutes:02}:{seconds:02}")
        } else {
            write!(f, "{minutes:02}:{seconds:02}")
        }
    }
}

/// The closed attempt as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalResult {
    pub attempt_id: AttemptId,
    pub elapsed_secs: u64,
    pub score: Option<f64>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counts shown before the student confirms a manual finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalizePrompt {
    pub unanswered: usize,
    pub unsaved: usize,
    pub remaining_secs: u64,
}

/// A slot with local content the store never acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnsavedItem {
    Question { position: usize, question_id: QuestionId },
    Essay(ExamUnitId),
}

/// What leaving the session requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExitIntent {
    Leave,
    ConfirmDiscard(Vec<UnsavedItem>),
}

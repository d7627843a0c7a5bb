use serde::Serialize;
use std::fmt;

use assess_core::model::QuestionId;

/// The externally visible state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateTag {
    Loading,
    Answering,
    Finalizing,
    Finished,
    /// The assessment has neither questions nor an essay slot.
    Empty,
    Error,
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateTag::Loading => "loading",
            StateTag::Answering => "answering",
            StateTag::Finalizing => "finalizing",
            StateTag::Finished => "finished",
            StateTag::Empty => "empty",
            StateTag::Error => "error",
        };
        f.write_str(name)
    }
}

/// Why a session sits in the error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// The attempt was already finalized; it never re-enters answering.
    AlreadyCompleted,
    /// The assessment or attempt does not exist remotely.
    AttemptMissing,
    /// The remote store could not be reached or answered garbage.
    Unavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::AlreadyCompleted => "already completed",
            FailureKind::AttemptMissing => "attempt missing",
            FailureKind::Unavailable => "store unavailable",
        };
        f.write_str(name)
    }
}

/// A fatal error replacing the main view, with its recovery option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    /// Only transport failures can be retried; the rest need a restart.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Unavailable
    }
}

//
// ─── NOTICES ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    AnswerNotSaved(QuestionId),
    EssayNotSaved,
    FinalizeFailed,
    /// The store refused a write because the attempt was closed elsewhere.
    AttemptLocked,
}

/// A dismissible, non-blocking message about a transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Notices {
    next_id: u64,
    items: Vec<Notice>,
}

impl Notices {
    /// Add a notice, replacing any earlier one of the same kind.
    pub(crate) fn push(&mut self, kind: NoticeKind, message: impl Into<String>) -> u64 {
        self.items.retain(|notice| notice.kind != kind);
        self.next_id += 1;
        self.items.push(Notice {
            id: self.next_id,
            kind,
            message: message.into(),
        });
        self.next_id
    }

    pub(crate) fn dismiss(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|notice| notice.id != id);
        self.items.len() != before
    }

    pub(crate) fn items(&self) -> &[Notice] {
        &self.items
    }
}

//
// ─── IN-FLIGHT GUARDS ──────────────────────────────────────────────────────────
//

/// Re-entrancy guard for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum InFlight {
    #[default]
    Idle,
    Running {
        generation: u64,
    },
}

impl InFlight {
    pub(crate) fn is_running(self) -> bool {
        matches!(self, InFlight::Running { .. })
    }

    pub(crate) fn matches(self, generation: u64) -> bool {
        self == InFlight::Running { generation }
    }
}

/// Whether reaching zero may still trigger the automatic finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AutoFinalize {
    #[default]
    Armed,
    Fired,
}

/// Which panel is editable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cursor {
    Question(usize),
    Essay,
}

/// Navigation request from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
    Question(usize),
    Essay,
}

/// What started a finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinalizeTrigger {
    Manual,
    Timeout,
}

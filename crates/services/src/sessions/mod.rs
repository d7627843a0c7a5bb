mod controller;
mod progress;
mod queries;
mod service;
mod state;
mod view;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use controller::SessionController;
pub use progress::SessionProgress;
pub use service::{
    AttemptSession, FinalizeStart, FinalizeTicket, InitTicket, LoadedAttempt, SessionTarget,
    SubmitRequest, SyncTicket,
};
pub use state::{
    Cursor, FailureKind, FinalizeTrigger, Navigation, Notice, NoticeKind, SessionFailure, StateTag,
};
pub use view::{
    AlternativeView, Countdown, CurrentView, EssayView, ExitIntent, FinalResult, FinalizePrompt,
    QuestionView, SessionSnapshot, UnsavedItem,
};

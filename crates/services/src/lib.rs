#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sessions;

pub use assess_core::Clock;

pub use config::SessionConfig;
pub use error::{ConfigError, SessionError};

pub use sessions::{
    AttemptSession, Countdown, CurrentView, ExitIntent, FinalizePrompt, FinalizeTrigger,
    Navigation, SessionController, SessionSnapshot, SessionTarget, StateTag,
};

use std::env;

use assess_core::elapsed::SyncPolicy;

use crate::error::ConfigError;

const SYNC_INTERVAL_VAR: &str = "ASSESS_SYNC_INTERVAL_SECS";
const MIN_DELTA_VAR: &str = "ASSESS_SYNC_MIN_DELTA_SECS";
const DISPLAY_REFRESH_VAR: &str = "ASSESS_DISPLAY_REFRESH_SECS";

/// Tunables for a session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub policy: SyncPolicy,
}

impl SessionConfig {
    #[must_use]
    pub fn new(policy: SyncPolicy) -> Self {
        Self { policy }
    }

    /// Build from `ASSESS_*` variables, using defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is not a number or the resulting
    /// policy is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = SyncPolicy::default();
        let read = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { var, raw }),
            }
        };

        let policy = SyncPolicy::new(
            read(SYNC_INTERVAL_VAR, defaults.sync_interval_secs())?,
            read(MIN_DELTA_VAR, defaults.min_delta_secs())?,
            read(DISPLAY_REFRESH_VAR, defaults.display_refresh_secs())?,
        )?;
        Ok(Self { policy })
    }
}

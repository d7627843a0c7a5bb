use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncPolicyError {
    #[error("sync interval must be > 0 seconds")]
    InvalidSyncInterval,
    #[error("display refresh must be > 0 seconds")]
    InvalidDisplayRefresh,
    #[error("minimum push delta ({min_delta}s) must not exceed the sync interval ({interval}s)")]
    DeltaExceedsInterval { min_delta: u64, interval: u64 },
}

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// Cadence and debounce for pushing elapsed time to the remote store.
///
/// Defaults: sync every 10 s, push only when at least 5 s accrued since the
/// last acknowledged push, refresh the countdown every second.
///
/// ```
/// # use assess_core::elapsed::SyncPolicy;
/// let policy = SyncPolicy::default();
/// assert_eq!(policy.sync_interval_secs(), 10);
/// assert_eq!(policy.min_delta_secs(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    sync_interval_secs: u64,
    min_delta_secs: u64,
    display_refresh_secs: u64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            sync_interval_secs: 10,
            min_delta_secs: 5,
            display_refresh_secs: 1,
        }
    }
}

impl SyncPolicy {
    /// # Errors
    ///
    /// Returns `SyncPolicyError` if either period is zero or the minimum delta
    /// could never be reached within one interval.
    pub fn new(
        sync_interval_secs: u64,
        min_delta_secs: u64,
        display_refresh_secs: u64,
    ) -> Result<Self, SyncPolicyError> {
        if sync_interval_secs == 0 {
            return Err(SyncPolicyError::InvalidSyncInterval);
        }
        if display_refresh_secs == 0 {
            return Err(SyncPolicyError::InvalidDisplayRefresh);
        }
        if min_delta_secs > sync_interval_secs {
            return Err(SyncPolicyError::DeltaExceedsInterval {
                min_delta: min_delta_secs,
                interval: sync_interval_secs,
            });
        }
        Ok(Self {
            sync_interval_secs,
            min_delta_secs,
            display_refresh_secs,
        })
    }

    #[must_use]
    pub fn sync_interval_secs(&self) -> u64 {
        self.sync_interval_secs
    }

    #[must_use]
    pub fn min_delta_secs(&self) -> u64 {
        self.min_delta_secs
    }

    #[must_use]
    pub fn display_refresh_secs(&self) -> u64 {
        self.display_refresh_secs
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    #[must_use]
    pub fn display_refresh(&self) -> Duration {
        Duration::from_secs(self.display_refresh_secs)
    }
}

//
// ─── ELAPSED TIME ──────────────────────────────────────────────────────────────
//

/// Reconciles locally measured session time with the remote cumulative counter.
///
/// * `remote_baseline` - elapsed seconds reported by the store when the session began
/// * `session_start` - wall-clock instant the local session began
/// * `last_synced` - highest value the store acknowledged during this session
///
/// Candidates never decrease: a wall clock stepping backwards repeats the
/// highest candidate already issued instead of producing a smaller one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapsedTime {
    remote_baseline: u64,
    session_start: DateTime<Utc>,
    last_synced: u64,
    high_water: u64,
}

impl ElapsedTime {
    #[must_use]
    pub fn start(remote_baseline: u64, session_start: DateTime<Utc>) -> Self {
        Self {
            remote_baseline,
            session_start,
            last_synced: remote_baseline,
            high_water: remote_baseline,
        }
    }

    #[must_use]
    pub fn remote_baseline(&self) -> u64 {
        self.remote_baseline
    }

    #[must_use]
    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    #[must_use]
    pub fn last_synced(&self) -> u64 {
        self.last_synced
    }

    fn measured(&self, now: DateTime<Utc>) -> u64 {
        let local = (now - self.session_start).num_seconds().max(0);
        self.remote_baseline
            .saturating_add(u64::try_from(local).unwrap_or(0))
    }

    /// Current elapsed value, without issuing it.
    #[must_use]
    pub fn current(&self, now: DateTime<Utc>) -> u64 {
        self.measured(now).max(self.high_water)
    }

    /// Issue a candidate for a push and raise the high-water mark.
    pub fn next_candidate(&mut self, now: DateTime<Utc>) -> u64 {
        let candidate = self.current(now);
        self.high_water = candidate;
        candidate
    }

    /// A periodic push candidate, or `None` while under the debounce threshold.
    pub fn due_push(&mut self, now: DateTime<Utc>, policy: &SyncPolicy) -> Option<u64> {
        let candidate = self.current(now);
        if candidate.saturating_sub(self.last_synced) < policy.min_delta_secs() {
            return None;
        }
        Some(self.next_candidate(now))
    }

    /// The unconditional push performed right before finishing.
    pub fn final_push(&mut self, now: DateTime<Utc>) -> u64 {
        self.next_candidate(now)
    }

    /// Record an acknowledged push. Completions arriving out of order never
    /// lower `last_synced`; returns whether the value was taken.
    pub fn record_pushed(&mut self, value: u64) -> bool {
        if value > self.last_synced {
            self.last_synced = value;
            return true;
        }
        false
    }

    /// Seconds left for an assessment of `duration_secs`, clamped at zero.
    #[must_use]
    pub fn remaining(&self, duration_secs: u64, now: DateTime<Utc>) -> u64 {
        duration_secs.saturating_sub(self.current(now))
    }
}

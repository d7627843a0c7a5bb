use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use assess_core::Clock;
use assess_core::model::{AlternativeId, Attempt, QuestionId, SaveOutcome, SlotKey};
use storage::repository::{RemoteStore, StorageError};

use crate::config::SessionConfig;
use crate::error::SessionError;

use super::queries::AttemptQueries;
use super::service::{AttemptSession, FinalizeStart, FinalizeTicket, SessionTarget, SubmitRequest};
use super::state::{Cursor, FinalizeTrigger, Navigation, StateTag};
use super::view::{Countdown, ExitIntent, FinalizePrompt, SessionSnapshot};

struct Shared {
    clock: Clock,
    store: RemoteStore,
    config: SessionConfig,
    session: Mutex<AttemptSession>,
    timers: Mutex<Option<TimerHandles>>,
    countdown: watch::Sender<Option<Countdown>>,
    /// Outcome of the last finalize run, for callers that joined it.
    finalized: watch::Sender<Option<Result<Attempt, SessionError>>>,
}

/// The synchronizer loop and the display-refresh loop.
struct TimerHandles {
    sync: JoinHandle<()>,
    refresh: JoinHandle<()>,
}

impl TimerHandles {
    fn is_running(&self) -> bool {
        !self.sync.is_finished() || !self.refresh.is_finished()
    }
}

impl Drop for TimerHandles {
    fn drop(&mut self) {
        self.sync.abort();
        self.refresh.abort();
    }
}

/// Drives an `AttemptSession` against the remote store and the two timers.
///
/// Cheap to clone; clones share one session. The session lock is never held
/// across a remote call, so submissions, pushes and finalize overlap freely.
/// The automatic finalize runs on its own task: stopping the timers or
/// leaving never cancels a finish that is already under way.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        store: RemoteStore,
        clock: Clock,
        config: SessionConfig,
        target: SessionTarget,
    ) -> Self {
        let (countdown, _) = watch::channel(None);
        let (finalized, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                clock,
                store,
                config,
                session: Mutex::new(AttemptSession::new(target, config.policy)),
                timers: Mutex::new(None),
                countdown,
                finalized,
            }),
        }
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut AttemptSession) -> R) -> R {
        let mut session = self
            .shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.shared.clock.now()
    }

    fn target(&self) -> SessionTarget {
        self.with_session(|s| s.target())
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Resolve the attempt and move out of loading.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if initialization is already running or the
    /// session is past loading. Store failures land in the error state.
    pub async fn initialize(&self) -> Result<StateTag, SessionError> {
        let ticket = self.with_session(AttemptSession::begin_initialize)?;
        let target = self.target();
        let loaded = AttemptQueries::load_or_create(&self.shared.store, &target).await;
        let now = self.now();
        self.with_session(|s| s.complete_initialize(ticket, loaded, now))
    }

    /// Initialize and, when answering, start both timers.
    ///
    /// # Errors
    ///
    /// See [`SessionController::initialize`].
    pub async fn open(&self) -> Result<StateTag, SessionError> {
        let state = self.initialize().await?;
        if state == StateTag::Answering {
            self.start_timers();
            self.publish_countdown();
        }
        Ok(state)
    }

    /// Re-run initialization from scratch after a retryable failure.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotRetryable` after a fatal failure.
    pub async fn retry(&self) -> Result<StateTag, SessionError> {
        self.open().await
    }

    /// Spawn the sync and display-refresh loops. No-op while they run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_timers(&self) {
        let mut timers = self
            .shared
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if timers.as_ref().is_some_and(TimerHandles::is_running) {
            return;
        }
        let policy = self.shared.config.policy;
        let weak = Arc::downgrade(&self.shared);
        *timers = Some(TimerHandles {
            sync: spawn_loop(weak.clone(), policy.sync_interval(), Tick::Sync),
            refresh: spawn_loop(weak, policy.display_refresh(), Tick::Refresh),
        });
        debug!("session timers started");
    }

    fn stop_timers(&self) {
        let handles = self
            .shared
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if handles.is_some() {
            debug!("session timers stopped");
        }
    }

    /// Stop timers and ignore every result still in flight.
    pub fn leave(&self) {
        self.stop_timers();
        if self.with_session(AttemptSession::teardown) {
            info!("session torn down");
        }
    }

    //
    // ─── TICKS ─────────────────────────────────────────────────────────────────
    //

    /// One synchronizer tick. Returns whether the session is still live.
    pub async fn sync_tick(&self) -> bool {
        let now = self.now();
        let (ticket, live) = self.with_session(|s| (s.begin_sync(now), s.is_live()));
        if let Some(ticket) = ticket {
            let result = self
                .shared
                .store
                .attempts
                .push_elapsed_time(ticket.attempt_id, ticket.elapsed_secs)
                .await;
            self.with_session(|s| s.complete_sync(ticket, &result));
        }
        live
    }

    /// One display-refresh tick: publish the countdown and fire the
    /// automatic finalize the first time it reads zero.
    pub async fn countdown_tick(&self) -> bool {
        let now = self.now();
        let (fire, live) = self.with_session(|s| (s.poll_timeout(now), s.is_live()));
        self.publish_countdown();
        if fire {
            info!("time is up; finalizing");
            let controller = self.clone();
            let run =
                tokio::spawn(async move { controller.finalize(FinalizeTrigger::Timeout).await });
            match run.await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "automatic finalize did not complete"),
                Err(err) => warn!(error = %err, "automatic finalize task ended early"),
            }
        }
        live
    }

    fn publish_countdown(&self) {
        let now = self.now();
        let countdown = self
            .with_session(|s| s.remaining_secs(now))
            .map(Countdown::new);
        self.shared.countdown.send_replace(countdown);
    }

    /// Countdown updates, refreshed on the display cadence.
    #[must_use]
    pub fn subscribe_countdown(&self) -> watch::Receiver<Option<Countdown>> {
        self.shared.countdown.subscribe()
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Select and immediately submit an alternative.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the write failed (a notice is also
    /// added), or a validation error before anything is sent.
    pub async fn select_alternative(
        &self,
        question: QuestionId,
        alternative: AlternativeId,
    ) -> Result<SaveOutcome, SessionError> {
        let request = self.with_session(|s| s.select_alternative(question, alternative))?;
        self.submit(request).await
    }

    /// # Errors
    ///
    /// Returns `SessionError` if the question is not an open-response question.
    pub fn edit_text(&self, question: QuestionId, text: impl Into<String>) -> Result<(), SessionError> {
        self.with_session(|s| s.edit_text(question, text))
    }

    /// Submit the current text of an open-response answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NothingToSave` if no text was entered, or
    /// `SessionError::Storage` if the write failed.
    pub async fn save_text(&self, question: QuestionId) -> Result<SaveOutcome, SessionError> {
        let request = self.with_session(|s| s.begin_save_text(question))?;
        self.submit(request).await
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoEssay` if the attempt has no essay slot.
    pub fn edit_essay(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.with_session(|s| s.edit_essay(text))
    }

    /// Submit the current essay text.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoEssay` or `SessionError::Storage`.
    pub async fn save_essay(&self) -> Result<SaveOutcome, SessionError> {
        let request = self.with_session(AttemptSession::begin_save_essay)?;
        self.submit(request).await
    }

    async fn submit(&self, request: SubmitRequest) -> Result<SaveOutcome, SessionError> {
        let SubmitRequest { attempt_id, ticket } = request;
        let answers = &self.shared.store.answers;
        let result = match ticket.key() {
            SlotKey::Question(question) => {
                answers
                    .submit_answer(attempt_id, question, ticket.value())
                    .await
            }
            SlotKey::Essay(exam_unit) => {
                let text = ticket.value().as_text().unwrap_or_default();
                answers.submit_essay(attempt_id, exam_unit, text).await
            }
        };
        let failure = result.as_ref().err().cloned();
        let outcome = self.with_session(|s| s.complete_save(ticket, &result));
        match (outcome, failure) {
            (None, _) => Err(SessionError::TornDown),
            (Some(_), Some(err)) => Err(SessionError::Storage(err)),
            (Some(outcome), None) => Ok(outcome),
        }
    }

    /// # Errors
    ///
    /// Returns `SessionError` for positions that do not exist.
    pub fn navigate(&self, to: Navigation) -> Result<Cursor, SessionError> {
        self.with_session(|s| s.navigate(to))
    }

    //
    // ─── FINALIZE ──────────────────────────────────────────────────────────────
    //

    /// Push the final elapsed time, then close the attempt.
    ///
    /// Calling this on a finished session returns the known record. A call
    /// made while another finalize is running waits for that run and shares
    /// its outcome.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` when the push or finish failed; the
    /// session is then answering again. Returns `SessionError::TornDown` if
    /// the session was left before the result arrived.
    pub async fn finalize(&self, trigger: FinalizeTrigger) -> Result<Attempt, SessionError> {
        let now = self.now();
        let (start, settled) = self.with_session(|s| {
            (
                s.begin_finalize(trigger, now),
                self.shared.finalized.subscribe(),
            )
        });
        let ticket = match start {
            Ok(FinalizeStart::AlreadyFinished(record)) => return Ok(record),
            Ok(FinalizeStart::Start(ticket)) => ticket,
            Err(SessionError::FinalizeInFlight) => return join_finalize(settled).await,
            Err(err) => return Err(err),
        };
        info!(
            attempt_id = %ticket.attempt_id(),
            elapsed_secs = ticket.elapsed_secs(),
            trigger = ?trigger,
            "finalizing attempt"
        );

        let outcome = self.run_finalize(&ticket).await;
        let result = self.with_session(|s| {
            let result = s.complete_finalize(&ticket, outcome);
            self.shared.finalized.send_replace(Some(result.clone()));
            result
        });
        if result.is_ok() {
            self.stop_timers();
            self.publish_countdown();
            self.with_session(AttemptSession::teardown);
        }
        result
    }

    async fn run_finalize(&self, ticket: &FinalizeTicket) -> Result<Attempt, StorageError> {
        let attempts = self.shared.store.attempts.as_ref();
        match attempts
            .push_elapsed_time(ticket.attempt_id(), ticket.elapsed_secs())
            .await
        {
            Ok(()) => self.with_session(|s| s.record_final_push(ticket)),
            Err(StorageError::AttemptFinished) => {
                debug!(attempt_id = %ticket.attempt_id(), "attempt already closed before final push");
            }
            Err(err) => return Err(err),
        }

        match attempts.finish_attempt(ticket.attempt_id()).await {
            Err(StorageError::AttemptFinished) => {
                debug!(attempt_id = %ticket.attempt_id(), "attempt already closed; re-reading it");
                let target = self.target();
                AttemptQueries::refetch(attempts, &target, ticket.attempt_id()).await
            }
            other => other,
        }
    }

    //
    // ─── READS ─────────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn state(&self) -> StateTag {
        self.with_session(|s| s.state())
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.now();
        self.with_session(|s| s.snapshot(now))
    }

    #[must_use]
    pub fn finalize_prompt(&self) -> Option<FinalizePrompt> {
        let now = self.now();
        self.with_session(|s| s.finalize_prompt(now))
    }

    #[must_use]
    pub fn exit_intent(&self) -> ExitIntent {
        self.with_session(|s| s.exit_intent())
    }

    pub fn dismiss_notice(&self, id: u64) -> bool {
        self.with_session(|s| s.dismiss_notice(id))
    }

    /// Run `f` against the current session state.
    pub fn inspect<R>(&self, f: impl FnOnce(&AttemptSession) -> R) -> R {
        self.with_session(|s| f(s))
    }
}

/// Wait for the finalize run that was in flight when `settled` subscribed.
async fn join_finalize(
    mut settled: watch::Receiver<Option<Result<Attempt, SessionError>>>,
) -> Result<Attempt, SessionError> {
    debug!("finalize already running; waiting for its outcome");
    if settled.changed().await.is_err() {
        return Err(SessionError::TornDown);
    }
    settled
        .borrow_and_update()
        .clone()
        .unwrap_or(Err(SessionError::FinalizeInFlight))
}

#[derive(Debug, Clone, Copy)]
enum Tick {
    Sync,
    Refresh,
}

/// A periodic loop holding only a weak handle, so a dropped controller ends it.
fn spawn_loop(shared: Weak<Shared>, period: Duration, tick: Tick) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let controller = SessionController { shared };
            let live = match tick {
                Tick::Sync => controller.sync_tick().await,
                Tick::Refresh => controller.countdown_tick().await,
            };
            if !live {
                break;
            }
        }
    })
}

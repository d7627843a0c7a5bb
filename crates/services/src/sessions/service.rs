use chrono::{DateTime, Utc};
use std::mem;
use tracing::{debug, info, warn};

use assess_core::elapsed::{ElapsedTime, SyncPolicy};
use assess_core::model::{
    AlternativeId, AnswerCache, AnswerEntry, AnswerValue, AssessmentGroupId, AssessmentId, Attempt,
    AttemptId, EssayDraft, Question, QuestionId, SaveOutcome, SaveStatus, SaveTicket, SlotKey,
    UserId,
};
use storage::repository::StorageError;

use crate::error::SessionError;

use super::progress::SessionProgress;
use super::state::{
    AutoFinalize, Cursor, FailureKind, FinalizeTrigger, InFlight, Navigation, Notice, NoticeKind,
    Notices, SessionFailure, StateTag,
};
use super::view::{
    AlternativeView, Countdown, CurrentView, EssayView, ExitIntent, FinalResult, FinalizePrompt,
    QuestionView, SessionSnapshot, UnsavedItem,
};

//
// ─── INPUTS ────────────────────────────────────────────────────────────────────
//

/// Which attempt a session runs: one user, one assessment within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTarget {
    pub group_id: AssessmentGroupId,
    pub assessment_id: AssessmentId,
    pub user_id: UserId,
}

/// A resolved attempt with its questions in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAttempt {
    pub attempt: Attempt,
    pub questions: Vec<Question>,
}

/// Issued by `begin_initialize`, consumed by `complete_initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitTicket {
    generation: u64,
}

/// A write the caller must send to the answer store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub attempt_id: AttemptId,
    pub ticket: SaveTicket,
}

/// A periodic elapsed-time push that passed the debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTicket {
    pub attempt_id: AttemptId,
    pub elapsed_secs: u64,
}

/// The final push and finish request of one finalize run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeTicket {
    generation: u64,
    attempt_id: AttemptId,
    elapsed_secs: u64,
    trigger: FinalizeTrigger,
}

impl FinalizeTicket {
    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// The value for the unconditional push, taken at kickoff.
    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    #[must_use]
    pub fn trigger(&self) -> FinalizeTrigger {
        self.trigger
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeStart {
    /// The session already holds the closed record.
    AlreadyFinished(Attempt),
    Start(FinalizeTicket),
}

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct ActiveAttempt {
    attempt: Attempt,
    questions: Vec<Question>,
    essay: Option<EssayDraft>,
    cache: AnswerCache,
    elapsed: ElapsedTime,
    cursor: Cursor,
    auto_finalize: AutoFinalize,
}

impl ActiveAttempt {
    fn resume(loaded: LoadedAttempt, now: DateTime<Utc>) -> Self {
        let LoadedAttempt { attempt, questions } = loaded;
        let essay = attempt.essay_unit().map(|unit| match attempt.essay() {
            Some(stored) if stored.exam_unit_id == unit => EssayDraft::from_stored(stored),
            _ => EssayDraft::empty(unit),
        });
        let cursor = if questions.is_empty() {
            Cursor::Essay
        } else {
            Cursor::Question(0)
        };
        Self {
            cache: AnswerCache::seeded(attempt.answers()),
            elapsed: ElapsedTime::start(attempt.elapsed_secs(), now),
            attempt,
            questions,
            essay,
            cursor,
            auto_finalize: AutoFinalize::Armed,
        }
    }

    fn question(&self, id: QuestionId) -> Result<&Question, SessionError> {
        self.questions
            .iter()
            .find(|q| q.id() == id)
            .ok_or(SessionError::UnknownQuestion(id))
    }

    fn open_response(&self, id: QuestionId) -> Result<&Question, SessionError> {
        let question = self.question(id)?;
        if question.is_objective() {
            return Err(SessionError::AnswerKindMismatch(id));
        }
        Ok(question)
    }

    fn essay_mut(&mut self) -> Result<&mut EssayDraft, SessionError> {
        self.essay.as_mut().ok_or(SessionError::NoEssay)
    }

    fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        self.elapsed.remaining(self.attempt.duration_secs(), now)
    }

    fn unsaved_items(&self) -> Vec<UnsavedItem> {
        let mut items: Vec<UnsavedItem> = self
            .questions
            .iter()
            .enumerate()
            .filter(|(_, q)| {
                self.cache
                    .get(q.id())
                    .is_some_and(|entry| entry.has_unsaved_content())
            })
            .map(|(position, q)| UnsavedItem::Question {
                position,
                question_id: q.id(),
            })
            .collect();
        if let Some(essay) = &self.essay {
            if essay.entry().has_unsaved_content() {
                items.push(UnsavedItem::Essay(essay.exam_unit_id()));
            }
        }
        items
    }

    fn progress(&self) -> SessionProgress {
        let answered_questions = self
            .questions
            .iter()
            .filter(|q| self.cache.get(q.id()).is_some_and(|e| e.is_answered()))
            .count();
        let essay_answered = self
            .essay
            .as_ref()
            .is_some_and(|essay| essay.entry().is_answered());
        let total = self.questions.len() + usize::from(self.essay.is_some());
        SessionProgress::tally(
            total,
            answered_questions + usize::from(essay_answered),
            self.unsaved_items().len(),
        )
    }

    fn current_view(&self) -> Option<CurrentView> {
        match self.cursor {
            Cursor::Essay => self.essay.as_ref().map(|essay| {
                let unit_name = self
                    .attempt
                    .exam_units()
                    .iter()
                    .find(|u| u.id == essay.exam_unit_id())
                    .map(|u| u.name.clone())
                    .unwrap_or_default();
                CurrentView::Essay(EssayView {
                    exam_unit_id: essay.exam_unit_id(),
                    unit_name,
                    text: essay.text().to_owned(),
                    status: essay.entry().status(),
                })
            }),
            Cursor::Question(position) => {
                let question = self.questions.get(position)?;
                let entry = self.cache.get(question.id());
                let selected = entry.and_then(|e| e.local().alternative());
                let confirmed = entry.is_some_and(|e| e.is_confirmed());
                let alternatives = question
                    .alternatives()
                    .iter()
                    .map(|alt| AlternativeView {
                        id: alt.id,
                        text: alt.text.clone(),
                        selected: selected == Some(alt.id),
                        confirmed: confirmed && selected == Some(alt.id),
                    })
                    .collect();
                let text = if question.is_objective() {
                    None
                } else {
                    Some(
                        entry
                            .and_then(|e| e.local().as_text())
                            .unwrap_or_default()
                            .to_owned(),
                    )
                };
                Some(CurrentView::Question(QuestionView {
                    position,
                    total: self.questions.len(),
                    question_id: question.id(),
                    exam_unit_id: question.exam_unit_id(),
                    prompt: question.prompt().to_owned(),
                    alternatives,
                    text,
                    status: entry.map_or(SaveStatus::Empty, AnswerEntry::status),
                }))
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    Loading,
    Answering(Box<ActiveAttempt>),
    Finalizing(Box<ActiveAttempt>),
    Finished(Box<Attempt>),
    Empty(Box<Attempt>),
    Failed(SessionFailure),
}

impl Phase {
    fn tag(&self) -> StateTag {
        match self {
            Phase::Loading => StateTag::Loading,
            Phase::Answering(_) => StateTag::Answering,
            Phase::Finalizing(_) => StateTag::Finalizing,
            Phase::Finished(_) => StateTag::Finished,
            Phase::Empty(_) => StateTag::Empty,
            Phase::Failed(_) => StateTag::Error,
        }
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// The session state machine for one attempt.
///
/// Pure and synchronous: every remote call is split into a `begin_*` step that
/// hands out a ticket and a `complete_*` step that applies the result. Time is
/// passed in explicitly.
#[derive(Debug, Clone)]
pub struct AttemptSession {
    target: SessionTarget,
    policy: SyncPolicy,
    phase: Phase,
    init: InFlight,
    finalize: InFlight,
    generation: u64,
    notices: Notices,
    torn_down: bool,
}

impl AttemptSession {
    #[must_use]
    pub fn new(target: SessionTarget, policy: SyncPolicy) -> Self {
        Self {
            target,
            policy,
            phase: Phase::Loading,
            init: InFlight::Idle,
            finalize: InFlight::Idle,
            generation: 0,
            notices: Notices::default(),
            torn_down: false,
        }
    }

    #[must_use]
    pub fn target(&self) -> SessionTarget {
        self.target
    }

    #[must_use]
    pub fn state(&self) -> StateTag {
        self.phase.tag()
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Answering or finalizing, and not torn down.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.torn_down && matches!(self.phase, Phase::Answering(_) | Phase::Finalizing(_))
    }

    #[must_use]
    pub fn failure(&self) -> Option<&SessionFailure> {
        match &self.phase {
            Phase::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// The closed attempt once the session finished.
    #[must_use]
    pub fn final_record(&self) -> Option<&Attempt> {
        match &self.phase {
            Phase::Finished(record) => Some(&**record),
            _ => None,
        }
    }

    #[must_use]
    pub fn attempt_id(&self) -> Option<AttemptId> {
        match &self.phase {
            Phase::Answering(active) | Phase::Finalizing(active) => Some(active.attempt.id()),
            Phase::Finished(attempt) | Phase::Empty(attempt) => Some(attempt.id()),
            Phase::Loading | Phase::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        self.active()
            .map_or(&[][..], |active| active.questions.as_slice())
    }

    #[must_use]
    pub fn cache(&self) -> Option<&AnswerCache> {
        self.active().map(|active| &active.cache)
    }

    #[must_use]
    pub fn essay(&self) -> Option<&EssayDraft> {
        self.active().and_then(|active| active.essay.as_ref())
    }

    #[must_use]
    pub fn elapsed(&self) -> Option<&ElapsedTime> {
        self.active().map(|active| &active.elapsed)
    }

    #[must_use]
    pub fn cursor(&self) -> Option<Cursor> {
        self.active().map(|active| active.cursor)
    }

    #[must_use]
    pub fn notices(&self) -> &[Notice] {
        self.notices.items()
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    fn active(&self) -> Option<&ActiveAttempt> {
        match &self.phase {
            Phase::Answering(active) | Phase::Finalizing(active) => Some(&**active),
            _ => None,
        }
    }

    fn active_mut(&mut self) -> Option<&mut ActiveAttempt> {
        match &mut self.phase {
            Phase::Answering(active) | Phase::Finalizing(active) => Some(&mut **active),
            _ => None,
        }
    }

    /// The active attempt, only while the student may interact with it.
    fn answering_mut(&mut self) -> Result<&mut ActiveAttempt, SessionError> {
        if self.torn_down {
            return Err(SessionError::TornDown);
        }
        let state = self.phase.tag();
        match &mut self.phase {
            Phase::Answering(active) => Ok(&mut **active),
            _ => Err(SessionError::NotAnswering { state }),
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    //
    // ─── INITIALIZE ────────────────────────────────────────────────────────────
    //

    /// Start (or restart, after a retryable failure) initialization.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InitializationInFlight` on a duplicate kickoff,
    /// `SessionError::NotRetryable` after a fatal failure, and
    /// `SessionError::AlreadyInitialized` once past loading.
    pub fn begin_initialize(&mut self) -> Result<InitTicket, SessionError> {
        if self.torn_down {
            return Err(SessionError::TornDown);
        }
        if self.init.is_running() {
            return Err(SessionError::InitializationInFlight);
        }
        let retry = match &self.phase {
            Phase::Loading => false,
            Phase::Failed(failure) if failure.is_retryable() => true,
            Phase::Failed(failure) => return Err(SessionError::NotRetryable(failure.kind)),
            other => {
                return Err(SessionError::AlreadyInitialized { state: other.tag() });
            }
        };
        if retry {
            self.phase = Phase::Loading;
        }
        let generation = self.next_generation();
        self.init = InFlight::Running { generation };
        Ok(InitTicket { generation })
    }

    /// Apply the outcome of loading the attempt.
    ///
    /// A finished attempt never re-enters answering; an attempt without
    /// questions or essay slot lands in the empty state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Superseded` for a stale ticket and
    /// `SessionError::TornDown` after teardown.
    pub fn complete_initialize(
        &mut self,
        ticket: InitTicket,
        result: Result<LoadedAttempt, SessionFailure>,
        now: DateTime<Utc>,
    ) -> Result<StateTag, SessionError> {
        if self.torn_down {
            debug!("ignoring initialization result after teardown");
            return Err(SessionError::TornDown);
        }
        if !self.init.matches(ticket.generation) {
            return Err(SessionError::Superseded);
        }
        self.init = InFlight::Idle;

        self.phase = match result {
            Err(failure) => {
                warn!(kind = %failure.kind, message = %failure.message, "initialization failed");
                Phase::Failed(failure)
            }
            Ok(loaded) if loaded.attempt.is_finished() => {
                let attempt_id = loaded.attempt.id();
                info!(%attempt_id, "attempt already finalized");
                Phase::Failed(SessionFailure::new(
                    FailureKind::AlreadyCompleted,
                    format!("attempt {attempt_id} was already submitted"),
                ))
            }
            Ok(loaded) if loaded.questions.is_empty() && loaded.attempt.essay_unit().is_none() => {
                info!(attempt_id = %loaded.attempt.id(), "assessment has nothing to answer");
                Phase::Empty(Box::new(loaded.attempt))
            }
            Ok(loaded) => {
                info!(
                    attempt_id = %loaded.attempt.id(),
                    elapsed_secs = loaded.attempt.elapsed_secs(),
                    questions = loaded.questions.len(),
                    "attempt ready"
                );
                Phase::Answering(Box::new(ActiveAttempt::resume(loaded, now)))
            }
        };
        Ok(self.phase.tag())
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Select an alternative; objective answers commit on selection.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if not answering, the question is unknown or
    /// open-response, or the alternative does not belong to it.
    pub fn select_alternative(
        &mut self,
        question: QuestionId,
        alternative: AlternativeId,
    ) -> Result<SubmitRequest, SessionError> {
        let active = self.answering_mut()?;
        let found = active.question(question)?;
        if !found.is_objective() {
            return Err(SessionError::AnswerKindMismatch(question));
        }
        if !found.has_alternative(alternative) {
            return Err(SessionError::UnknownAlternative {
                question,
                alternative,
            });
        }
        active
            .cache
            .edit(question, AnswerValue::Alternative(alternative));
        let ticket = active
            .cache
            .begin_save(question)
            .ok_or(SessionError::NothingToSave(question))?;
        Ok(SubmitRequest {
            attempt_id: active.attempt.id(),
            ticket,
        })
    }

    /// Replace the local text of an open-response answer without saving it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if not answering or the question is not open-response.
    pub fn edit_text(
        &mut self,
        question: QuestionId,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        let active = self.answering_mut()?;
        active.open_response(question)?;
        active.cache.edit(question, AnswerValue::Text(text.into()));
        Ok(())
    }

    /// Start an explicit save of an open-response answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NothingToSave` if no text was ever entered.
    pub fn begin_save_text(&mut self, question: QuestionId) -> Result<SubmitRequest, SessionError> {
        let active = self.answering_mut()?;
        active.open_response(question)?;
        let ticket = active
            .cache
            .begin_save(question)
            .ok_or(SessionError::NothingToSave(question))?;
        Ok(SubmitRequest {
            attempt_id: active.attempt.id(),
            ticket,
        })
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoEssay` if the attempt has no essay slot.
    pub fn edit_essay(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        self.answering_mut()?.essay_mut()?.edit(text);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::NoEssay` if the attempt has no essay slot.
    pub fn begin_save_essay(&mut self) -> Result<SubmitRequest, SessionError> {
        let active = self.answering_mut()?;
        let attempt_id = active.attempt.id();
        let ticket = active.essay_mut()?.begin_save();
        Ok(SubmitRequest { attempt_id, ticket })
    }

    /// Apply the result of an answer or essay write.
    ///
    /// Results still land while finalizing. Returns `None` when the session
    /// no longer holds the slot (torn down, finished or failed).
    pub fn complete_save(
        &mut self,
        ticket: SaveTicket,
        result: &Result<(), StorageError>,
    ) -> Option<SaveOutcome> {
        if self.torn_down {
            debug!(key = ?ticket.key(), "ignoring save result after teardown");
            return None;
        }
        let active = self.active_mut()?;
        let key = ticket.key();
        let succeeded = result.is_ok();
        let outcome = match key {
            SlotKey::Question(_) => active.cache.settle(ticket, succeeded),
            SlotKey::Essay(_) => match active.essay.as_mut() {
                Some(essay) => essay.settle(ticket, succeeded),
                None => SaveOutcome::Superseded,
            },
        };

        if let Err(err) = result {
            let attempt_id = active.attempt.id();
            warn!(%attempt_id, ?key, error = %err, "answer was not saved");
            let (kind, message) = match (err, key) {
                (StorageError::AttemptFinished, _) => (
                    NoticeKind::AttemptLocked,
                    "this attempt was closed and no longer accepts answers".to_owned(),
                ),
                (_, SlotKey::Question(question)) => (
                    NoticeKind::AnswerNotSaved(question),
                    format!("answer to question {question} was not saved; try again"),
                ),
                (_, SlotKey::Essay(_)) => (
                    NoticeKind::EssayNotSaved,
                    "essay was not saved; try again".to_owned(),
                ),
            };
            self.notices.push(kind, message);
        } else if outcome == SaveOutcome::Superseded {
            debug!(?key, "stale save completion discarded");
        }
        Some(outcome)
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Move the cursor. Local text of every slot is kept as is.
    ///
    /// `Next` from the last question moves to the essay when there is one;
    /// at either end the cursor stays put.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPosition` or `SessionError::NoEssay` for
    /// targets that do not exist.
    pub fn navigate(&mut self, to: Navigation) -> Result<Cursor, SessionError> {
        let active = self.answering_mut()?;
        let count = active.questions.len();
        let has_essay = active.essay.is_some();
        let next = match (to, active.cursor) {
            (Navigation::Question(position), _) if position < count => Cursor::Question(position),
            (Navigation::Question(position), _) => {
                return Err(SessionError::InvalidPosition(position));
            }
            (Navigation::Essay, _) if has_essay => Cursor::Essay,
            (Navigation::Essay, _) => return Err(SessionError::NoEssay),
            (Navigation::Next, Cursor::Question(i)) if i + 1 < count => Cursor::Question(i + 1),
            (Navigation::Next, Cursor::Question(_)) if has_essay => Cursor::Essay,
            (Navigation::Previous, Cursor::Question(i)) if i > 0 => Cursor::Question(i - 1),
            (Navigation::Previous, Cursor::Essay) if count > 0 => Cursor::Question(count - 1),
            (_, current) => current,
        };
        active.cursor = next;
        Ok(next)
    }

    //
    // ─── ELAPSED TIME ──────────────────────────────────────────────────────────
    //

    /// A periodic push, if answering and the debounce threshold is reached.
    pub fn begin_sync(&mut self, now: DateTime<Utc>) -> Option<SyncTicket> {
        if self.torn_down {
            return None;
        }
        let policy = self.policy;
        let Phase::Answering(active) = &mut self.phase else {
            return None;
        };
        let elapsed_secs = active.elapsed.due_push(now, &policy)?;
        Some(SyncTicket {
            attempt_id: active.attempt.id(),
            elapsed_secs,
        })
    }

    /// Apply a push result. Failures are logged and left for the next tick.
    /// Returns whether `last_synced` moved.
    pub fn complete_sync(&mut self, ticket: SyncTicket, result: &Result<(), StorageError>) -> bool {
        if let Err(err) = result {
            warn!(
                attempt_id = %ticket.attempt_id,
                elapsed_secs = ticket.elapsed_secs,
                error = %err,
                "elapsed time push failed"
            );
            return false;
        }
        if self.torn_down {
            return false;
        }
        match self.active_mut() {
            Some(active) if active.attempt.id() == ticket.attempt_id => {
                debug!(
                    attempt_id = %ticket.attempt_id,
                    elapsed_secs = ticket.elapsed_secs,
                    "elapsed time pushed"
                );
                active.elapsed.record_pushed(ticket.elapsed_secs)
            }
            _ => false,
        }
    }

    /// Seconds left, clamped at zero. `None` outside answering and finalizing.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        self.active().map(|active| active.remaining_secs(now))
    }

    /// True exactly once: the first time the countdown is seen at zero while answering.
    pub fn poll_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if self.torn_down {
            return false;
        }
        let Phase::Answering(active) = &mut self.phase else {
            return false;
        };
        if active.auto_finalize == AutoFinalize::Fired || active.remaining_secs(now) > 0 {
            return false;
        }
        active.auto_finalize = AutoFinalize::Fired;
        true
    }

    //
    // ─── FINALIZE ──────────────────────────────────────────────────────────────
    //

    /// Enter finalizing and take the value for the unconditional final push.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::FinalizeInFlight` if a finalize is already
    /// running, or `SessionError::NotAnswering` from any other state.
    pub fn begin_finalize(
        &mut self,
        trigger: FinalizeTrigger,
        now: DateTime<Utc>,
    ) -> Result<FinalizeStart, SessionError> {
        if let Phase::Finished(record) = &self.phase {
            return Ok(FinalizeStart::AlreadyFinished(record.as_ref().clone()));
        }
        if self.torn_down {
            return Err(SessionError::TornDown);
        }
        if self.finalize.is_running() {
            return Err(SessionError::FinalizeInFlight);
        }
        let mut active = match mem::replace(&mut self.phase, Phase::Loading) {
            Phase::Answering(active) => active,
            other => {
                let state = other.tag();
                self.phase = other;
                return Err(SessionError::NotAnswering { state });
            }
        };
        let elapsed_secs = active.elapsed.final_push(now);
        let attempt_id = active.attempt.id();
        self.phase = Phase::Finalizing(active);

        let generation = self.next_generation();
        self.finalize = InFlight::Running { generation };
        Ok(FinalizeStart::Start(FinalizeTicket {
            generation,
            attempt_id,
            elapsed_secs,
            trigger,
        }))
    }

    /// Record that the final push was acknowledged.
    pub fn record_final_push(&mut self, ticket: &FinalizeTicket) {
        if !self.finalize.matches(ticket.generation) {
            return;
        }
        if let Some(active) = self.active_mut() {
            active.elapsed.record_pushed(ticket.elapsed_secs);
        }
    }

    /// Apply the finish result.
    ///
    /// Success stores the closed record. A missing attempt is fatal; any
    /// other failure returns to answering with a notice so the student can
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns the store error on failure, `SessionError::Superseded` for a
    /// stale ticket and `SessionError::TornDown` after teardown.
    pub fn complete_finalize(
        &mut self,
        ticket: &FinalizeTicket,
        result: Result<Attempt, StorageError>,
    ) -> Result<Attempt, SessionError> {
        if self.torn_down {
            debug!(attempt_id = %ticket.attempt_id, "ignoring finalize result after teardown");
            return Err(SessionError::TornDown);
        }
        if !self.finalize.matches(ticket.generation) {
            return Err(SessionError::Superseded);
        }
        self.finalize = InFlight::Idle;

        let active = match mem::replace(&mut self.phase, Phase::Loading) {
            Phase::Finalizing(active) => active,
            other => {
                self.phase = other;
                return Err(SessionError::Superseded);
            }
        };

        let result = result.and_then(|record| {
            if record.is_finished() {
                Ok(record)
            } else {
                Err(StorageError::Serialization(
                    "finish returned an open attempt".to_owned(),
                ))
            }
        });

        match result {
            Ok(record) => {
                info!(
                    attempt_id = %record.id(),
                    elapsed_secs = record.elapsed_secs(),
                    score = ?record.score(),
                    "attempt finalized"
                );
                self.phase = Phase::Finished(Box::new(record.clone()));
                Ok(record)
            }
            Err(StorageError::NotFound) => {
                warn!(attempt_id = %ticket.attempt_id, "attempt vanished during finalize");
                self.phase = Phase::Failed(SessionFailure::new(
                    FailureKind::AttemptMissing,
                    format!("attempt {} no longer exists", ticket.attempt_id),
                ));
                Err(SessionError::Storage(StorageError::NotFound))
            }
            Err(err) => {
                warn!(
                    attempt_id = %ticket.attempt_id,
                    trigger = ?ticket.trigger,
                    error = %err,
                    "finalize failed; back to answering"
                );
                self.notices.push(
                    NoticeKind::FinalizeFailed,
                    "submitting the attempt failed; try again",
                );
                self.phase = Phase::Answering(active);
                Err(SessionError::Storage(err))
            }
        }
    }

    //
    // ─── EXIT ──────────────────────────────────────────────────────────────────
    //

    /// Whether leaving needs confirmation that unsaved work will be lost.
    #[must_use]
    pub fn exit_intent(&self) -> ExitIntent {
        let items = self
            .active()
            .map(ActiveAttempt::unsaved_items)
            .unwrap_or_default();
        if items.is_empty() {
            ExitIntent::Leave
        } else {
            ExitIntent::ConfirmDiscard(items)
        }
    }

    /// Counts to show before a manual finalize; `None` unless answering.
    #[must_use]
    pub fn finalize_prompt(&self, now: DateTime<Utc>) -> Option<FinalizePrompt> {
        let Phase::Answering(active) = &self.phase else {
            return None;
        };
        let progress = active.progress();
        Some(FinalizePrompt {
            unanswered: progress.unanswered(),
            unsaved: progress.unsaved,
            remaining_secs: active.remaining_secs(now),
        })
    }

    #[must_use]
    pub fn progress(&self) -> Option<SessionProgress> {
        self.active().map(ActiveAttempt::progress)
    }

    /// Stop accepting results. Returns false if already torn down.
    pub fn teardown(&mut self) -> bool {
        !mem::replace(&mut self.torn_down, true)
    }

    //
    // ─── SNAPSHOT ──────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let active = self.active();
        SessionSnapshot {
            state: self.state(),
            view: active.and_then(ActiveAttempt::current_view),
            countdown: active.map(|a| Countdown::new(a.remaining_secs(now))),
            progress: active.map(ActiveAttempt::progress),
            notices: self.notices.items().to_vec(),
            failure: self.failure().cloned(),
            result: self.final_record().map(|record| FinalResult {
                attempt_id: record.id(),
                elapsed_secs: record.elapsed_secs(),
                score: record.score(),
                finished_at: record.finished_at(),
            }),
        }
    }
}

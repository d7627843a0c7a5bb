use tracing::{debug, info};

use assess_core::model::{AssessmentId, Attempt, AttemptId, Question, sort_for_display};
use storage::repository::{AttemptRepository, QuestionRepository, RemoteStore, StorageError};

use super::service::{LoadedAttempt, SessionTarget};
use super::state::{FailureKind, SessionFailure};

/// Storage-backed lookups that resolve which attempt a session runs.
pub(crate) struct AttemptQueries;

/// Missing records are fatal; everything else is worth a retry.
fn failure_from(err: &StorageError, action: &str) -> SessionFailure {
    match err {
        StorageError::NotFound => SessionFailure::new(
            FailureKind::AttemptMissing,
            format!("{action}: assessment or attempt not found"),
        ),
        other => SessionFailure::unavailable(format!("{action}: {other}")),
    }
}

/// The attempt for `assessment`, preferring an unfinished one.
fn select_attempt(attempts: Vec<Attempt>, assessment: AssessmentId) -> Option<Attempt> {
    let mut matching: Vec<Attempt> = attempts
        .into_iter()
        .filter(|attempt| attempt.assessment_id() == assessment)
        .collect();
    match matching.iter().position(|attempt| !attempt.is_finished()) {
        Some(open) => Some(matching.swap_remove(open)),
        None => matching.into_iter().next(),
    }
}

impl AttemptQueries {
    /// Resolve (resuming or lazily creating) the attempt and load its questions.
    ///
    /// Questions are skipped for an attempt that is already finished.
    ///
    /// # Errors
    ///
    /// Returns a `SessionFailure` classified by `failure_from`.
    pub(crate) async fn load_or_create(
        store: &RemoteStore,
        target: &SessionTarget,
    ) -> Result<LoadedAttempt, SessionFailure> {
        let attempt = Self::resolve_attempt(store.attempts.as_ref(), target).await?;
        if attempt.is_finished() {
            return Ok(LoadedAttempt {
                attempt,
                questions: Vec::new(),
            });
        }
        let questions = Self::load_questions(store.questions.as_ref(), &attempt)
            .await
            .map_err(|err| failure_from(&err, "loading questions"))?;
        Ok(LoadedAttempt { attempt, questions })
    }

    async fn resolve_attempt(
        attempts: &dyn AttemptRepository,
        target: &SessionTarget,
    ) -> Result<Attempt, SessionFailure> {
        let existing = Self::find_attempt(attempts, target)
            .await
            .map_err(|err| failure_from(&err, "fetching attempts"))?;
        if let Some(attempt) = existing {
            info!(
                attempt_id = %attempt.id(),
                elapsed_secs = attempt.elapsed_secs(),
                "resuming attempt"
            );
            return Ok(attempt);
        }

        match attempts
            .create_attempt(target.user_id, target.assessment_id)
            .await
        {
            Ok(attempt) => {
                info!(attempt_id = %attempt.id(), "created attempt");
                Ok(attempt)
            }
            Err(StorageError::Conflict) => {
                debug!(
                    assessment_id = %target.assessment_id,
                    "attempt created concurrently; fetching it"
                );
                Self::find_attempt(attempts, target)
                    .await
                    .map_err(|err| failure_from(&err, "re-fetching attempts"))?
                    .ok_or_else(|| {
                        SessionFailure::unavailable(
                            "attempt was created concurrently but is not visible yet",
                        )
                    })
            }
            Err(err) => Err(failure_from(&err, "creating attempt")),
        }
    }

    /// Look up the target's attempt without creating one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached.
    pub(crate) async fn find_attempt(
        attempts: &dyn AttemptRepository,
        target: &SessionTarget,
    ) -> Result<Option<Attempt>, StorageError> {
        let all = attempts
            .fetch_attempts_for_user(target.group_id, target.user_id)
            .await?;
        Ok(select_attempt(all, target.assessment_id))
    }

    /// Re-read a specific attempt, e.g. after `finish` reported it closed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the store no longer lists it.
    pub(crate) async fn refetch(
        attempts: &dyn AttemptRepository,
        target: &SessionTarget,
        attempt_id: AttemptId,
    ) -> Result<Attempt, StorageError> {
        attempts
            .fetch_attempts_for_user(target.group_id, target.user_id)
            .await?
            .into_iter()
            .find(|attempt| attempt.id() == attempt_id)
            .ok_or(StorageError::NotFound)
    }

    /// Questions of every exam unit, units in attempt order, each sorted for display.
    async fn load_questions(
        questions: &dyn QuestionRepository,
        attempt: &Attempt,
    ) -> Result<Vec<Question>, StorageError> {
        let mut all = Vec::new();
        for unit in attempt.exam_units() {
            let mut batch = questions.fetch_questions(unit.id).await?;
            sort_for_display(&mut batch);
            all.extend(batch);
        }
        Ok(all)
    }
}

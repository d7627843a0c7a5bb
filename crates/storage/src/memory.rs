use async_trait::async_trait;
use assess_core::Clock;
use assess_core::model::{
    AlternativeId, AnswerValue, AssessmentGroupId, AssessmentId, Attempt, AttemptError,
    AttemptId, ExamUnit, ExamUnitId, Question, QuestionId, UserId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::repository::{AnswerRepository, AttemptRepository, QuestionRepository, StorageError};

/// Store operations that can carry an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    FetchAttempts,
    CreateAttempt,
    SubmitAnswer,
    SubmitEssay,
    PushElapsed,
    FinishAttempt,
    FetchQuestions,
}

/// A scripted deviation consumed by the next call of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the call with this error; the store is left untouched.
    Fail(StorageError),
    /// Answer a fetch with an empty list, as if read from a lagging replica.
    Stale,
}

/// An assessment the in-memory store can create attempts for.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentTemplate {
    pub id: AssessmentId,
    pub group_id: AssessmentGroupId,
    pub duration_secs: u64,
    pub exam_units: Vec<ExamUnit>,
    /// Correct alternative per objective question; used to score on finish.
    pub answer_key: HashMap<QuestionId, AlternativeId>,
}

impl AssessmentTemplate {
    #[must_use]
    pub fn new(
        id: AssessmentId,
        group_id: AssessmentGroupId,
        duration_secs: u64,
        exam_units: Vec<ExamUnit>,
    ) -> Self {
        Self {
            id,
            group_id,
            duration_secs,
            exam_units,
            answer_key: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_answer(mut self, question: QuestionId, correct: AlternativeId) -> Self {
        self.answer_key.insert(question, correct);
        self
    }
}

#[derive(Default)]
struct MemoryState {
    assessments: HashMap<AssessmentId, AssessmentTemplate>,
    questions: HashMap<ExamUnitId, Vec<Question>>,
    attempts: HashMap<AttemptId, Attempt>,
    next_attempt_id: u64,
    elapsed_log: HashMap<AttemptId, Vec<u64>>,
    faults: HashMap<StoreOperation, VecDeque<Fault>>,
    calls: HashMap<StoreOperation, usize>,
}

impl MemoryState {
    fn take_fault(&mut self, op: StoreOperation) -> Option<Fault> {
        *self.calls.entry(op).or_default() += 1;
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn open_attempt_mut(&mut self, id: AttemptId) -> Result<&mut Attempt, StorageError> {
        let attempt = self.attempts.get_mut(&id).ok_or(StorageError::NotFound)?;
        if attempt.is_finished() {
            return Err(StorageError::AttemptFinished);
        }
        Ok(attempt)
    }

    fn score(&self, attempt: &Attempt) -> Option<f64> {
        let template = self.assessments.get(&attempt.assessment_id())?;
        if template.answer_key.is_empty() {
            return None;
        }
        let correct = template
            .answer_key
            .iter()
            .filter(|(question, correct)| {
                attempt.answer_for(**question).and_then(AnswerValue::alternative)
                    == Some(**correct)
            })
            .count();
        Some(f64::from(u32::try_from(correct).unwrap_or(u32::MAX)))
    }
}

fn attempt_error(err: AttemptError) -> StorageError {
    match err {
        AttemptError::Finished(_) => StorageError::AttemptFinished,
        other => StorageError::Serialization(other.to_string()),
    }
}

/// Simple in-memory remote store for testing and prototyping.
///
/// Clones share state. Faults queued with [`InMemoryStore::inject`] are
/// consumed one per call of the matching operation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Clock,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Register an assessment and the questions of its units.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn register_assessment(
        &self,
        template: AssessmentTemplate,
        questions: Vec<Question>,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        for question in questions {
            guard
                .questions
                .entry(question.exam_unit_id())
                .or_default()
                .push(question);
        }
        guard.assessments.insert(template.id, template);
        Ok(())
    }

    /// Insert an attempt as-is, e.g. one left over from an earlier session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn insert_attempt(&self, attempt: Attempt) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.next_attempt_id = guard.next_attempt_id.max(attempt.id().value());
        guard.attempts.insert(attempt.id(), attempt);
        Ok(())
    }

    /// Queue a fault for the next call of `op`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn inject(&self, op: StoreOperation, fault: Fault) -> Result<(), StorageError> {
        self.lock()?.faults.entry(op).or_default().push_back(fault);
        Ok(())
    }

    /// Current record of an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt does not exist.
    pub fn attempt(&self, id: AttemptId) -> Result<Attempt, StorageError> {
        self.lock()?
            .attempts
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    /// Every elapsed value accepted for an attempt, in arrival order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn elapsed_pushes(&self, id: AttemptId) -> Result<Vec<u64>, StorageError> {
        Ok(self
            .lock()?
            .elapsed_log
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    /// Number of calls made to `op`, including failed ones.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store lock is poisoned.
    pub fn call_count(&self, op: StoreOperation) -> Result<usize, StorageError> {
        Ok(self.lock()?.calls.get(&op).copied().unwrap_or(0))
    }
}

#[async_trait]
impl AttemptRepository for InMemoryStore {
    async fn fetch_attempts_for_user(
        &self,
        group: AssessmentGroupId,
        user: UserId,
    ) -> Result<Vec<Attempt>, StorageError> {
        let mut guard = self.lock()?;
        match guard.take_fault(StoreOperation::FetchAttempts) {
            Some(Fault::Fail(err)) => return Err(err),
            Some(Fault::Stale) => return Ok(Vec::new()),
            None => {}
        }
        let mut found: Vec<Attempt> = guard
            .attempts
            .values()
            .filter(|attempt| attempt.user_id() == user)
            .filter(|attempt| {
                guard
                    .assessments
                    .get(&attempt.assessment_id())
                    .is_some_and(|template| template.group_id == group)
            })
            .cloned()
            .collect();
        found.sort_by_key(Attempt::id);
        Ok(found)
    }

    async fn create_attempt(
        &self,
        user: UserId,
        assessment: AssessmentId,
    ) -> Result<Attempt, StorageError> {
        let mut guard = self.lock()?;
        if let Some(Fault::Fail(err)) = guard.take_fault(StoreOperation::CreateAttempt) {
            return Err(err);
        }
        let template = guard
            .assessments
            .get(&assessment)
            .cloned()
            .ok_or(StorageError::NotFound)?;
        let exists = guard
            .attempts
            .values()
            .any(|a| a.user_id() == user && a.assessment_id() == assessment);
        if exists {
            return Err(StorageError::Conflict);
        }

        guard.next_attempt_id += 1;
        let attempt = Attempt::new(
            AttemptId::new(guard.next_attempt_id),
            user,
            assessment,
            template.duration_secs,
            template.exam_units,
            self.clock.now(),
        );
        guard.attempts.insert(attempt.id(), attempt.clone());
        Ok(attempt)
    }

    async fn push_elapsed_time(&self, attempt: AttemptId, secs: u64) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(Fault::Fail(err)) = guard.take_fault(StoreOperation::PushElapsed) {
            return Err(err);
        }
        guard
            .open_attempt_mut(attempt)?
            .record_elapsed(secs)
            .map_err(attempt_error)?;
        guard.elapsed_log.entry(attempt).or_default().push(secs);
        Ok(())
    }

    async fn finish_attempt(&self, attempt: AttemptId) -> Result<Attempt, StorageError> {
        let mut guard = self.lock()?;
        if let Some(Fault::Fail(err)) = guard.take_fault(StoreOperation::FinishAttempt) {
            return Err(err);
        }
        let current = guard
            .attempts
            .get(&attempt)
            .cloned()
            .ok_or(StorageError::NotFound)?;
        if current.is_finished() {
            return Ok(current);
        }

        let score = guard.score(&current);
        let now = self.clock.now();
        let record = guard.open_attempt_mut(attempt)?;
        record.finish(now, score).map_err(attempt_error)?;
        Ok(record.clone())
    }
}

#[async_trait]
impl AnswerRepository for InMemoryStore {
    async fn submit_answer(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        value: &AnswerValue,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(Fault::Fail(err)) = guard.take_fault(StoreOperation::SubmitAnswer) {
            return Err(err);
        }
        guard
            .open_attempt_mut(attempt)?
            .record_answer(question, value.clone())
            .map_err(attempt_error)
    }

    async fn submit_essay(
        &self,
        attempt: AttemptId,
        exam_unit: ExamUnitId,
        text: &str,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if let Some(Fault::Fail(err)) = guard.take_fault(StoreOperation::SubmitEssay) {
            return Err(err);
        }
        guard
            .open_attempt_mut(attempt)?
            .record_essay(exam_unit, text)
            .map_err(attempt_error)
    }
}

#[async_trait]
impl QuestionRepository for InMemoryStore {
    async fn fetch_questions(&self, exam_unit: ExamUnitId) -> Result<Vec<Question>, StorageError> {
        let mut guard = self.lock()?;
        match guard.take_fault(StoreOperation::FetchQuestions) {
            Some(Fault::Fail(err)) => return Err(err),
            Some(Fault::Stale) => return Ok(Vec::new()),
            None => {}
        }
        Ok(guard
            .questions
            .get(&exam_unit)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::time::fixed_now;

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new().with_clock(Clock::fixed(fixed_now()));
        let unit = ExamUnitId::new(10);
        let template = AssessmentTemplate::new(
            AssessmentId::new(1),
            AssessmentGroupId::new(100),
            600,
            vec![ExamUnit::new(unit, "Unit")],
        )
        .with_answer(QuestionId::new(1), AlternativeId::new(2));
        store
            .register_assessment(
                template,
                vec![Question::open_response(QuestionId::new(1), unit, 0, "Q")],
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let store = seeded_store();
        let user = UserId::new(5);
        store.create_attempt(user, AssessmentId::new(1)).await.unwrap();
        let err = store
            .create_attempt(user, AssessmentId::new(1))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::Conflict);
    }

    #[tokio::test]
    async fn finish_scores_and_is_idempotent() {
        let store = seeded_store();
        let attempt = store
            .create_attempt(UserId::new(5), AssessmentId::new(1))
            .await
            .unwrap();
        store
            .submit_answer(
                attempt.id(),
                QuestionId::new(1),
                &AnswerValue::Alternative(AlternativeId::new(2)),
            )
            .await
            .unwrap();

        let first = store.finish_attempt(attempt.id()).await.unwrap();
        let second = store.finish_attempt(attempt.id()).await.unwrap();
        assert_eq!(first.score(), Some(1.0));
        assert_eq!(first, second);

        let err = store.push_elapsed_time(attempt.id(), 30).await.unwrap_err();
        assert_eq!(err, StorageError::AttemptFinished);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_once() {
        let store = seeded_store();
        store
            .inject(
                StoreOperation::FetchAttempts,
                Fault::Fail(StorageError::Connection("down".into())),
            )
            .unwrap();

        let group = AssessmentGroupId::new(100);
        let user = UserId::new(5);
        assert!(store.fetch_attempts_for_user(group, user).await.is_err());
        assert!(store.fetch_attempts_for_user(group, user).await.is_ok());
        assert_eq!(store.call_count(StoreOperation::FetchAttempts).unwrap(), 2);
    }
}

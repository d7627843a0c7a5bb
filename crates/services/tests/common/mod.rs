#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};

use assess_core::Clock;
use assess_core::model::{
    Alternative, AlternativeId, AnswerValue, AssessmentGroupId, AssessmentId, Attempt, AttemptId,
    ExamUnit, ExamUnitId, Question, QuestionId, StoredAnswer, UserId,
};
use assess_core::time::fixed_now;
use services::{SessionConfig, SessionController, SessionTarget};
use storage::repository::{AnswerRepository, AttemptRepository, StorageError};
use storage::{AssessmentTemplate, InMemoryStore, RemoteStore};

pub const GROUP: AssessmentGroupId = AssessmentGroupId::new(100);
pub const ASSESSMENT: AssessmentId = AssessmentId::new(1);
pub const USER: UserId = UserId::new(7);
pub const MATHS: ExamUnitId = ExamUnitId::new(10);
pub const WRITING: ExamUnitId = ExamUnitId::new(11);

pub fn target() -> SessionTarget {
    SessionTarget {
        group_id: GROUP,
        assessment_id: ASSESSMENT,
        user_id: USER,
    }
}

/// Objective question with alternatives `id*10+1` and `id*10+2`.
pub fn objective(id: u64, order: u32) -> Question {
    Question::objective(
        QuestionId::new(id),
        MATHS,
        order,
        format!("Question {id}"),
        vec![
            Alternative::new(AlternativeId::new(id * 10 + 1), 0, "first"),
            Alternative::new(AlternativeId::new(id * 10 + 2), 1, "second"),
        ],
    )
    .unwrap()
}

pub fn open(id: u64, order: u32) -> Question {
    Question::open_response(QuestionId::new(id), MATHS, order, format!("Explain {id}"))
}

pub fn units(with_essay: bool) -> Vec<ExamUnit> {
    let mut units = vec![ExamUnit::new(MATHS, "Maths")];
    if with_essay {
        units.push(ExamUnit::new(WRITING, "Writing").with_essay());
    }
    units
}

pub fn store(clock: &Clock, duration_secs: u64, with_essay: bool, questions: Vec<Question>) -> InMemoryStore {
    let store = InMemoryStore::new().with_clock(clock.clone());
    let mut template = AssessmentTemplate::new(ASSESSMENT, GROUP, duration_secs, units(with_essay));
    for question in &questions {
        if let Some(first) = question.alternatives().first() {
            template = template.with_answer(question.id(), first.id);
        }
    }
    store.register_assessment(template, questions).unwrap();
    store
}

/// An unfinished attempt from an earlier session.
pub fn prior_attempt(
    id: u64,
    duration_secs: u64,
    elapsed_secs: u64,
    answers: Vec<(u64, AnswerValue)>,
    with_essay: bool,
) -> Attempt {
    Attempt::from_persisted(
        AttemptId::new(id),
        USER,
        ASSESSMENT,
        duration_secs,
        units(with_essay),
        elapsed_secs,
        fixed_now(),
        None,
        None,
        answers
            .into_iter()
            .map(|(question, value)| StoredAnswer {
                question_id: QuestionId::new(question),
                value,
            })
            .collect(),
        None,
    )
    .unwrap()
}

pub fn controller(store: &InMemoryStore, clock: &Clock) -> SessionController {
    SessionController::new(
        RemoteStore::in_memory(store),
        clock.clone(),
        SessionConfig::default(),
        target(),
    )
}

pub fn manual_clock() -> Clock {
    Clock::manual(fixed_now())
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

type Gate = Mutex<Option<oneshot::Receiver<()>>>;

/// Senders that release the held store calls; `None` when the call is not held.
pub struct Gates {
    pub finish: Option<oneshot::Sender<()>>,
    pub answer: Option<oneshot::Sender<()>>,
}

/// Delegates to an `InMemoryStore`, holding the first `finish_attempt` and
/// the first `submit_answer` until released. A held answer reaches the
/// store only after its release.
struct GatedStore {
    inner: InMemoryStore,
    finish: Gate,
    answer: Gate,
}

async fn pass(gate: &Gate) {
    let gate = gate.lock().await.take();
    if let Some(gate) = gate {
        let _ = gate.await;
    }
}

fn gate(hold: bool) -> (Option<oneshot::Sender<()>>, Gate) {
    if hold {
        let (release, gate) = oneshot::channel();
        (Some(release), Mutex::new(Some(gate)))
    } else {
        (None, Mutex::new(None))
    }
}

#[async_trait]
impl AttemptRepository for GatedStore {
    async fn fetch_attempts_for_user(
        &self,
        group: AssessmentGroupId,
        user: UserId,
    ) -> Result<Vec<Attempt>, StorageError> {
        self.inner.fetch_attempts_for_user(group, user).await
    }

    async fn create_attempt(
        &self,
        user: UserId,
        assessment: AssessmentId,
    ) -> Result<Attempt, StorageError> {
        self.inner.create_attempt(user, assessment).await
    }

    async fn push_elapsed_time(&self, attempt: AttemptId, secs: u64) -> Result<(), StorageError> {
        self.inner.push_elapsed_time(attempt, secs).await
    }

    async fn finish_attempt(&self, attempt: AttemptId) -> Result<Attempt, StorageError> {
        pass(&self.finish).await;
        self.inner.finish_attempt(attempt).await
    }
}

#[async_trait]
impl AnswerRepository for GatedStore {
    async fn submit_answer(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        value: &AnswerValue,
    ) -> Result<(), StorageError> {
        pass(&self.answer).await;
        self.inner.submit_answer(attempt, question, value).await
    }

    async fn submit_essay(
        &self,
        attempt: AttemptId,
        exam_unit: ExamUnitId,
        text: &str,
    ) -> Result<(), StorageError> {
        self.inner.submit_essay(attempt, exam_unit, text).await
    }
}

pub fn gated_controller(
    store: &InMemoryStore,
    clock: &Clock,
    hold_finish: bool,
    hold_answer: bool,
) -> (SessionController, Gates) {
    let (finish_release, finish) = gate(hold_finish);
    let (answer_release, answer) = gate(hold_answer);
    let gated = Arc::new(GatedStore {
        inner: store.clone(),
        finish,
        answer,
    });
    let remote = RemoteStore {
        attempts: gated.clone(),
        answers: gated,
        questions: Arc::new(store.clone()),
    };
    let controller = SessionController::new(remote, clock.clone(), SessionConfig::default(), target());
    (
        controller,
        Gates {
            finish: finish_release,
            answer: answer_release,
        },
    )
}

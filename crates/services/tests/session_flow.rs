mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};

use assess_core::model::{
    AlternativeId, AnswerValue, AttemptId, ExamUnitId, QuestionId, SaveOutcome, SaveStatus,
};
use services::sessions::{FailureKind, NoticeKind};
use services::{
    CurrentView, ExitIntent, FinalizeTrigger, Navigation, SessionConfig, SessionController,
    SessionError, StateTag,
};
use storage::repository::{AnswerRepository, AttemptRepository, StorageError};
use storage::{Fault, InMemoryStore, RemoteStore, StoreOperation};

use common::*;

#[tokio::test]
async fn fresh_attempt_objective_answer_confirms_and_completes() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    let controller = controller(&store, &clock);

    assert_eq!(controller.initialize().await.unwrap(), StateTag::Answering);
    assert_eq!(store.call_count(StoreOperation::CreateAttempt).unwrap(), 1);

    let outcome = controller
        .select_alternative(QuestionId::new(1), AlternativeId::new(12))
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::Applied);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.progress.unwrap().percent, 100);
    let Some(CurrentView::Question(view)) = snapshot.view else {
        panic!("expected question view");
    };
    assert!(view.alternatives[1].selected && view.alternatives[1].confirmed);
    assert!(!view.alternatives[0].selected);

    let attempt_id = view_attempt(&controller);
    assert_eq!(
        store.attempt(attempt_id).unwrap().answer_for(QuestionId::new(1)),
        Some(&AnswerValue::Alternative(AlternativeId::new(12)))
    );
}

fn view_attempt(controller: &SessionController) -> AttemptId {
    controller.inspect(|s| s.attempt_id()).unwrap()
}

#[tokio::test]
async fn resumed_attempt_shows_remaining_time_from_baseline() {
    let mut clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    store
        .insert_attempt(prior_attempt(5, 600, 120, vec![], false))
        .unwrap();
    let controller = controller(&store, &clock);

    controller.initialize().await.unwrap();
    assert_eq!(store.call_count(StoreOperation::CreateAttempt).unwrap(), 0);
    assert_eq!(
        controller.inspect(|s| s.elapsed().map(|e| e.remote_baseline())),
        Some(120)
    );

    clock.advance_secs(50);
    let countdown = controller.snapshot().countdown.unwrap();
    assert_eq!(countdown.remaining_secs, 430);
    assert_eq!(countdown.to_string(), "07:10");
}

#[tokio::test]
async fn resumed_open_answer_is_confirmed_and_visible() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![open(1, 0)]);
    store
        .insert_attempt(prior_attempt(
            5,
            600,
            0,
            vec![(1, AnswerValue::Text("draft text".into()))],
            false,
        ))
        .unwrap();
    let controller = controller(&store, &clock);
    controller.initialize().await.unwrap();

    let Some(CurrentView::Question(view)) = controller.snapshot().view else {
        panic!("expected question view");
    };
    assert_eq!(view.text.as_deref(), Some("draft text"));
    assert_eq!(view.status, SaveStatus::Saved);
    assert_eq!(controller.exit_intent(), ExitIntent::Leave);
}

#[tokio::test]
async fn failed_finalize_at_timeout_returns_to_answering() {
    let mut clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    store
        .insert_attempt(prior_attempt(5, 600, 590, vec![], false))
        .unwrap();
    let controller = controller(&store, &clock);
    controller.initialize().await.unwrap();

    store
        .inject(
            StoreOperation::FinishAttempt,
            Fault::Fail(StorageError::Connection("offline".into())),
        )
        .unwrap();
    clock.advance_secs(10);
    assert!(controller.countdown_tick().await);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, StateTag::Answering);
    assert_eq!(snapshot.countdown.unwrap().remaining_secs, 0);
    assert_eq!(snapshot.notices[0].kind, NoticeKind::FinalizeFailed);
    assert_eq!(store.elapsed_pushes(AttemptId::new(5)).unwrap(), vec![600]);

    // auto-finalize does not fire twice
    clock.advance_secs(1);
    controller.countdown_tick().await;
    assert_eq!(store.call_count(StoreOperation::FinishAttempt).unwrap(), 1);

    // still answerable, and finalize can be triggered again
    controller
        .select_alternative(QuestionId::new(1), AlternativeId::new(11))
        .await
        .unwrap();
    let record = controller.finalize(FinalizeTrigger::Manual).await.unwrap();
    assert!(record.is_finished());
    assert_eq!(record.score(), Some(1.0));
    assert_eq!(controller.state(), StateTag::Finished);

    let pushes = store.elapsed_pushes(AttemptId::new(5)).unwrap();
    assert_eq!(pushes.len(), 2);
    assert!(pushes.windows(2).all(|w| w[0] <= w[1]), "{pushes:?}");
}

/// Acknowledges the first essay write only once released.
struct SlowFirstEssay {
    inner: InMemoryStore,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl AnswerRepository for SlowFirstEssay {
    async fn submit_answer(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        value: &AnswerValue,
    ) -> Result<(), StorageError> {
        self.inner.submit_answer(attempt, question, value).await
    }

    async fn submit_essay(
        &self,
        attempt: AttemptId,
        exam_unit: ExamUnitId,
        text: &str,
    ) -> Result<(), StorageError> {
        self.inner.submit_essay(attempt, exam_unit, text).await?;
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn late_essay_ack_does_not_confirm_stale_text() {
    let clock = manual_clock();
    let store = store(&clock, 600, true, vec![]);
    let (release, gate) = oneshot::channel();
    let remote = RemoteStore {
        attempts: Arc::new(store.clone()),
        answers: Arc::new(SlowFirstEssay {
            inner: store.clone(),
            gate: Mutex::new(Some(gate)),
        }),
        questions: Arc::new(store.clone()),
    };
    let controller = SessionController::new(remote, clock.clone(), SessionConfig::default(), target());
    controller.initialize().await.unwrap();

    controller.edit_essay("one").unwrap();
    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.save_essay().await })
    };
    settle().await;
    assert!(controller.inspect(|s| s.essay().unwrap().entry().is_saving()));

    controller.edit_essay("two").unwrap();
    assert_eq!(controller.save_essay().await.unwrap(), SaveOutcome::Applied);

    release.send(()).unwrap();
    assert_eq!(first.await.unwrap().unwrap(), SaveOutcome::Superseded);

    controller.inspect(|s| {
        let essay = s.essay().unwrap();
        assert_eq!(essay.text(), "two");
        assert!(essay.entry().is_confirmed());
        assert_eq!(essay.entry().saved(), Some(&AnswerValue::Text("two".into())));
    });
    let Some(CurrentView::Essay(view)) = controller.snapshot().view else {
        panic!("expected essay view");
    };
    assert_eq!(view.status, SaveStatus::Saved);
    assert_eq!(view.unit_name, "Writing");
}

#[tokio::test]
async fn finalize_twice_is_idempotent() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    let controller = controller(&store, &clock);
    controller.initialize().await.unwrap();

    let first = controller.finalize(FinalizeTrigger::Manual).await.unwrap();
    let second = controller.finalize(FinalizeTrigger::Manual).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(controller.state(), StateTag::Finished);
    assert_eq!(store.call_count(StoreOperation::FinishAttempt).unwrap(), 1);
    assert_eq!(controller.snapshot().result.unwrap().attempt_id, first.id());
}

#[tokio::test]
async fn concurrent_finalize_calls_share_one_finish() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    let (controller, gates) = gated_controller(&store, &clock, true, false);
    controller.initialize().await.unwrap();

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.finalize(FinalizeTrigger::Manual).await })
    };
    settle().await;
    assert_eq!(controller.state(), StateTag::Finalizing);

    let second = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.finalize(FinalizeTrigger::Timeout).await })
    };
    settle().await;
    gates.finish.unwrap().send(()).unwrap();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first, second);
    assert!(first.is_finished());
    assert_eq!(store.call_count(StoreOperation::FinishAttempt).unwrap(), 1);
    assert_eq!(store.call_count(StoreOperation::PushElapsed).unwrap(), 1);
    assert_eq!(controller.state(), StateTag::Finished);
}

#[tokio::test]
async fn concurrent_finalize_call_reports_the_shared_failure() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    let (controller, gates) = gated_controller(&store, &clock, true, false);
    controller.initialize().await.unwrap();
    store
        .inject(
            StoreOperation::FinishAttempt,
            Fault::Fail(StorageError::Connection("offline".into())),
        )
        .unwrap();

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.finalize(FinalizeTrigger::Manual).await })
    };
    settle().await;
    let second = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.finalize(FinalizeTrigger::Manual).await })
    };
    settle().await;
    gates.finish.unwrap().send(()).unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(SessionError::Storage(StorageError::Connection(_)))
    ));
    assert!(matches!(
        second.await.unwrap(),
        Err(SessionError::Storage(StorageError::Connection(_)))
    ));
    assert_eq!(controller.state(), StateTag::Answering);
    assert_eq!(controller.snapshot().notices.len(), 1);
}

#[tokio::test]
async fn attempt_closed_elsewhere_is_treated_as_finished() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    let controller = controller(&store, &clock);
    controller.initialize().await.unwrap();
    let attempt_id = view_attempt(&controller);

    store.finish_attempt(attempt_id).await.unwrap();
    store
        .inject(
            StoreOperation::FinishAttempt,
            Fault::Fail(StorageError::AttemptFinished),
        )
        .unwrap();

    let record = controller.finalize(FinalizeTrigger::Manual).await.unwrap();
    assert!(record.is_finished());
    assert_eq!(controller.state(), StateTag::Finished);
}

#[tokio::test]
async fn creation_race_resumes_the_other_attempt() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    store
        .insert_attempt(prior_attempt(42, 600, 30, vec![], false))
        .unwrap();
    // the first listing misses the attempt another request just created
    store.inject(StoreOperation::FetchAttempts, Fault::Stale).unwrap();

    let controller = controller(&store, &clock);
    assert_eq!(controller.initialize().await.unwrap(), StateTag::Answering);
    assert_eq!(view_attempt(&controller), AttemptId::new(42));
    assert_eq!(store.call_count(StoreOperation::CreateAttempt).unwrap(), 1);
    assert_eq!(store.call_count(StoreOperation::FetchAttempts).unwrap(), 2);
}

#[tokio::test]
async fn finished_attempt_never_reenters_answering() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    let mut prior = prior_attempt(5, 600, 100, vec![], false);
    prior.finish(clock.now(), Some(0.0)).unwrap();
    store.insert_attempt(prior).unwrap();

    let controller = controller(&store, &clock);
    assert_eq!(controller.initialize().await.unwrap(), StateTag::Error);
    let failure = controller.snapshot().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::AlreadyCompleted);
    assert!(matches!(
        controller.retry().await,
        Err(SessionError::NotRetryable(FailureKind::AlreadyCompleted))
    ));
    assert_eq!(store.call_count(StoreOperation::FetchQuestions).unwrap(), 0);
}

#[tokio::test]
async fn assessment_without_questions_or_essay_is_empty() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![]);
    let controller = controller(&store, &clock);
    assert_eq!(controller.initialize().await.unwrap(), StateTag::Empty);
    assert!(controller.snapshot().view.is_none());
}

#[tokio::test]
async fn unknown_assessment_is_fatal() {
    let clock = manual_clock();
    let store = InMemoryStore::new().with_clock(clock.clone());
    let controller = controller(&store, &clock);
    assert_eq!(controller.initialize().await.unwrap(), StateTag::Error);
    assert_eq!(
        controller.snapshot().failure.unwrap().kind,
        FailureKind::AttemptMissing
    );
}

#[tokio::test]
async fn transient_load_failure_can_be_retried() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    store
        .inject(
            StoreOperation::FetchQuestions,
            Fault::Fail(StorageError::Http(503)),
        )
        .unwrap();
    let controller = controller(&store, &clock);

    assert_eq!(controller.initialize().await.unwrap(), StateTag::Error);
    assert!(controller.snapshot().failure.unwrap().is_retryable());

    assert_eq!(controller.retry().await.unwrap(), StateTag::Answering);
    // the attempt created on the first pass is resumed, not duplicated
    assert_eq!(store.call_count(StoreOperation::CreateAttempt).unwrap(), 1);
    controller.leave();
}

#[tokio::test]
async fn failed_submission_leaves_navigation_free_and_can_be_resubmitted() {
    let clock = manual_clock();
    let store = store(&clock, 600, false, vec![open(2, 1), objective(1, 0)]);
    let controller = controller(&store, &clock);
    controller.initialize().await.unwrap();

    store
        .inject(
            StoreOperation::SubmitAnswer,
            Fault::Fail(StorageError::Connection("reset".into())),
        )
        .unwrap();
    let err = controller
        .select_alternative(QuestionId::new(1), AlternativeId::new(11))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)));

    let snapshot = controller.snapshot();
    assert_eq!(
        snapshot.notices[0].kind,
        NoticeKind::AnswerNotSaved(QuestionId::new(1))
    );
    assert_eq!(snapshot.progress.unwrap().unsaved, 1);

    controller.navigate(Navigation::Next).unwrap();
    controller
        .edit_text(QuestionId::new(2), "unsaved thoughts")
        .unwrap();
    controller.navigate(Navigation::Previous).unwrap();

    assert_eq!(
        controller
            .select_alternative(QuestionId::new(1), AlternativeId::new(11))
            .await
            .unwrap(),
        SaveOutcome::Applied
    );
    assert!(controller.dismiss_notice(snapshot.notices[0].id));

    let prompt = controller.finalize_prompt().unwrap();
    assert_eq!(prompt.unanswered, 1);
    assert_eq!(prompt.unsaved, 1);
    assert!(matches!(
        controller.exit_intent(),
        ExitIntent::ConfirmDiscard(items) if items.len() == 1
    ));

    controller.leave();
    assert!(matches!(
        controller.save_text(QuestionId::new(2)).await,
        Err(SessionError::TornDown)
    ));
}

#[tokio::test]
async fn pushed_elapsed_time_never_decreases() {
    let mut clock = manual_clock();
    let store = store(&clock, 600, false, vec![objective(1, 0)]);
    store
        .insert_attempt(prior_attempt(5, 600, 7, vec![], false))
        .unwrap();
    let controller = controller(&store, &clock);
    controller.initialize().await.unwrap();

    for (step, fail) in [(3, false), (7, false), (10, true), (5, false), (2, false)] {
        clock.advance_secs(step);
        if fail {
            store
                .inject(
                    StoreOperation::PushElapsed,
                    Fault::Fail(StorageError::Connection("timeout".into())),
                )
                .unwrap();
        }
        assert!(controller.sync_tick().await);
    }
    controller.finalize(FinalizeTrigger::Manual).await.unwrap();

    let pushes = store.elapsed_pushes(AttemptId::new(5)).unwrap();
    assert_eq!(pushes, vec![17, 32, 34]);
    assert!(pushes.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(store.attempt(AttemptId::new(5)).unwrap().elapsed_secs(), 34);
}

use assess_core::model::{
    Alternative, AlternativeId, AnswerValue, AssessmentId, Attempt, AttemptId, ExamUnit,
    ExamUnitId, Question, QuestionId, StoredAnswer, StoredEssay, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

//
// ─── RESPONSES ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttemptDto {
    id: u64,
    user_id: u64,
    assessment_id: u64,
    duration: u64,
    #[serde(default)]
    exams: Vec<ExamUnitDto>,
    #[serde(default)]
    elapsed_time: u64,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    score: Option<f64>,
    #[serde(default)]
    answers: Vec<AnswerDto>,
    essay: Option<EssayDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamUnitDto {
    id: u64,
    name: String,
    #[serde(default)]
    has_essay: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerDto {
    question_id: u64,
    alternative_id: Option<u64>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EssayDto {
    exam_id: u64,
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionDto {
    id: u64,
    exam_id: u64,
    order: u32,
    statement: String,
    kind: QuestionKindDto,
    #[serde(default)]
    alternatives: Vec<AlternativeDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum QuestionKindDto {
    Objective,
    Open,
}

#[derive(Debug, Deserialize)]
struct AlternativeDto {
    id: u64,
    order: u32,
    text: String,
}

impl AnswerDto {
    fn into_domain(self) -> Result<StoredAnswer, StorageError> {
        let value = match (self.alternative_id, self.text) {
            (Some(alt), None) => AnswerValue::Alternative(AlternativeId::new(alt)),
            (None, Some(text)) => AnswerValue::Text(text),
            _ => {
                return Err(StorageError::Serialization(format!(
                    "answer for question {} must carry exactly one of alternativeId or text",
                    self.question_id
                )));
            }
        };
        Ok(StoredAnswer {
            question_id: QuestionId::new(self.question_id),
            value,
        })
    }
}

impl AttemptDto {
    pub(crate) fn into_domain(self) -> Result<Attempt, StorageError> {
        let exam_units = self
            .exams
            .into_iter()
            .map(|unit| ExamUnit {
                id: ExamUnitId::new(unit.id),
                name: unit.name,
                has_essay: unit.has_essay,
            })
            .collect();
        let answers = self
            .answers
            .into_iter()
            .map(AnswerDto::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        let essay = self.essay.map(|essay| StoredEssay {
            exam_unit_id: ExamUnitId::new(essay.exam_id),
            text: essay.text,
        });

        Attempt::from_persisted(
            AttemptId::new(self.id),
            UserId::new(self.user_id),
            AssessmentId::new(self.assessment_id),
            self.duration,
            exam_units,
            self.elapsed_time,
            self.started_at,
            self.finished_at,
            self.score,
            answers,
            essay,
        )
        .map_err(|e| StorageError::from(assess_core::Error::from(e)))
    }
}

impl QuestionDto {
    pub(crate) fn into_domain(self) -> Result<Question, StorageError> {
        let id = QuestionId::new(self.id);
        let unit = ExamUnitId::new(self.exam_id);
        match self.kind {
            QuestionKindDto::Open => Ok(Question::open_response(
                id,
                unit,
                self.order,
                self.statement,
            )),
            QuestionKindDto::Objective => {
                let alternatives = self
                    .alternatives
                    .into_iter()
                    .map(|alt| Alternative::new(AlternativeId::new(alt.id), alt.order, alt.text))
                    .collect();
                Question::objective(id, unit, self.order, self.statement, alternatives)
                    .map_err(|e| StorageError::from(assess_core::Error::from(e)))
            }
        }
    }
}

pub(crate) fn parse_attempts(body: &str) -> Result<Vec<Attempt>, StorageError> {
    let dtos: Vec<AttemptDto> = serde_json::from_str(body).map_err(ser)?;
    dtos.into_iter().map(AttemptDto::into_domain).collect()
}

pub(crate) fn parse_attempt(body: &str) -> Result<Attempt, StorageError> {
    serde_json::from_str::<AttemptDto>(body)
        .map_err(ser)?
        .into_domain()
}

pub(crate) fn parse_questions(body: &str) -> Result<Vec<Question>, StorageError> {
    let dtos: Vec<QuestionDto> = serde_json::from_str(body).map_err(ser)?;
    dtos.into_iter().map(QuestionDto::into_domain).collect()
}

//
// ─── REQUESTS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateAttemptRequest {
    pub user_id: u64,
    pub assessment_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnswerRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
}

impl<'a> AnswerRequest<'a> {
    pub(crate) fn from_value(value: &'a AnswerValue) -> Self {
        match value {
            AnswerValue::Alternative(id) => Self {
                alternative_id: Some(id.value()),
                text: None,
            },
            AnswerValue::Text(text) => Self {
                alternative_id: None,
                text: Some(text),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EssayRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ElapsedTimeRequest {
    pub elapsed_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTEMPT_JSON: &str = r#"{
        "id": 9,
        "userId": 5,
        "assessmentId": 2,
        "duration": 600,
        "exams": [
            {"id": 10, "name": "Maths"},
            {"id": 11, "name": "Writing", "hasEssay": true}
        ],
        "elapsedTime": 120,
        "startedAt": "2023-11-14T22:13:20Z",
        "finishedAt": null,
        "score": null,
        "answers": [
            {"questionId": 1, "alternativeId": 3},
            {"questionId": 2, "text": "draft text"}
        ],
        "essay": {"examId": 11, "text": "intro"}
    }"#;

    #[test]
    fn attempt_payload_maps_to_domain() {
        let attempt = parse_attempt(ATTEMPT_JSON).unwrap();
        assert_eq!(attempt.id(), AttemptId::new(9));
        assert_eq!(attempt.elapsed_secs(), 120);
        assert!(!attempt.is_finished());
        assert_eq!(attempt.essay_unit(), Some(ExamUnitId::new(11)));
        assert_eq!(
            attempt.answer_for(QuestionId::new(2)),
            Some(&AnswerValue::Text("draft text".into()))
        );
        assert_eq!(attempt.essay().map(|e| e.text.as_str()), Some("intro"));
    }

    #[test]
    fn answer_with_both_fields_is_rejected() {
        let body = ATTEMPT_JSON.replace(
            r#"{"questionId": 1, "alternativeId": 3}"#,
            r#"{"questionId": 1, "alternativeId": 3, "text": "x"}"#,
        );
        let err = parse_attempt(&body).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn objective_question_without_alternatives_is_rejected() {
        let body = r#"[{"id": 1, "examId": 10, "order": 0, "statement": "Q", "kind": "objective"}]"#;
        assert!(matches!(
            parse_questions(body).unwrap_err(),
            StorageError::Serialization(_)
        ));
    }

    #[test]
    fn questions_parse_both_kinds() {
        let body = r#"[
            {"id": 2, "examId": 10, "order": 1, "statement": "Explain", "kind": "open"},
            {"id": 1, "examId": 10, "order": 0, "statement": "Pick", "kind": "objective",
             "alternatives": [{"id": 5, "order": 1, "text": "b"}, {"id": 4, "order": 0, "text": "a"}]}
        ]"#;
        let questions = parse_questions(body).unwrap();
        assert!(!questions[0].is_objective());
        assert_eq!(questions[1].alternatives()[0].id, AlternativeId::new(4));
    }

    #[test]
    fn answer_request_serializes_one_field() {
        let value = AnswerValue::Alternative(AlternativeId::new(3));
        let json = serde_json::to_string(&AnswerRequest::from_value(&value)).unwrap();
        assert_eq!(json, r#"{"alternativeId":3}"#);

        let value = AnswerValue::Text("hi".into());
        let json = serde_json::to_string(&AnswerRequest::from_value(&value)).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }
}

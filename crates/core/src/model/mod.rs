mod answer;
mod attempt;
mod ids;
mod question;

pub use ids::{
    AlternativeId, AssessmentGroupId, AssessmentId, AttemptId, ExamUnitId, ParseIdError,
    QuestionId, UserId,
};

pub use answer::{
    AnswerCache, AnswerEntry, AnswerValue, EssayDraft, SaveOutcome, SaveStatus, SaveTicket,
    SlotKey,
};
pub use attempt::{Attempt, AttemptError, ExamUnit, StoredAnswer, StoredEssay};
pub use question::{Alternative, Question, QuestionError, QuestionKind, sort_for_display};

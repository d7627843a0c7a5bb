use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::attempt::{StoredAnswer, StoredEssay};
use crate::model::ids::{AlternativeId, ExamUnitId, QuestionId};

/// The value a student gives for a question or the essay slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerValue {
    Alternative(AlternativeId),
    Text(String),
}

impl AnswerValue {
    /// True for text that is empty or whitespace only. An alternative is never blank.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Alternative(_) => false,
            AnswerValue::Text(text) => text.trim().is_empty(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnswerValue::Text(text) => Some(text),
            AnswerValue::Alternative(_) => None,
        }
    }

    #[must_use]
    pub fn alternative(&self) -> Option<AlternativeId> {
        match self {
            AnswerValue::Alternative(id) => Some(*id),
            AnswerValue::Text(_) => None,
        }
    }
}

/// What the UI shows next to an answer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveStatus {
    Empty,
    Unsaved,
    Saving,
    Saved,
}

/// Which slot a save targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKey {
    Question(QuestionId),
    Essay(ExamUnitId),
}

/// Handed out when a save starts and handed back when the remote call settles.
///
/// Carries the exact value that was sent so the completion confirms that value,
/// not whatever the slot holds by then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTicket {
    key: SlotKey,
    seq: u64,
    value: AnswerValue,
}

impl SaveTicket {
    #[must_use]
    pub fn key(&self) -> SlotKey {
        self.key
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn value(&self) -> &AnswerValue {
        &self.value
    }
}

/// How a settled save changed its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The ticket's value is now the acknowledged value of the slot.
    Applied,
    /// A later save already settled successfully; this result was discarded.
    Superseded,
    /// The remote call failed; the acknowledged value is unchanged.
    Failed,
}

//
// ─── ENTRY ─────────────────────────────────────────────────────────────────────
//

/// Local state of one answer slot.
///
/// `saved` is the value of the highest-sequence save that succeeded. The entry
/// is confirmed only while the local value still equals it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEntry {
    local: AnswerValue,
    saved: Option<AnswerValue>,
    last_issued: Option<AnswerValue>,
    next_seq: u64,
    applied_seq: u64,
    pending: u32,
}

impl AnswerEntry {
    /// An entry the remote store already holds.
    #[must_use]
    pub fn confirmed(value: AnswerValue) -> Self {
        Self {
            local: value.clone(),
            saved: Some(value),
            last_issued: None,
            next_seq: 0,
            applied_seq: 0,
            pending: 0,
        }
    }

    /// An entry that exists only locally.
    #[must_use]
    pub fn draft(value: AnswerValue) -> Self {
        Self {
            local: value,
            saved: None,
            last_issued: None,
            next_seq: 0,
            applied_seq: 0,
            pending: 0,
        }
    }

    #[must_use]
    pub fn local(&self) -> &AnswerValue {
        &self.local
    }

    #[must_use]
    pub fn saved(&self) -> Option<&AnswerValue> {
        self.saved.as_ref()
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.saved.as_ref() == Some(&self.local)
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.pending > 0
    }

    /// Unconfirmed, non-blank local content.
    #[must_use]
    pub fn has_unsaved_content(&self) -> bool {
        !self.is_confirmed() && !self.local.is_blank()
    }

    /// True when the remote store acknowledged a non-blank value for this slot.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.saved.as_ref().is_some_and(|v| !v.is_blank())
    }

    #[must_use]
    pub fn status(&self) -> SaveStatus {
        if self.pending > 0 && self.last_issued.as_ref() == Some(&self.local) {
            return SaveStatus::Saving;
        }
        if self.is_confirmed() {
            return SaveStatus::Saved;
        }
        if self.local.is_blank() && self.saved.is_none() {
            return SaveStatus::Empty;
        }
        SaveStatus::Unsaved
    }

    pub fn edit(&mut self, value: AnswerValue) {
        self.local = value;
    }

    fn begin_save(&mut self, key: SlotKey) -> SaveTicket {
        self.next_seq += 1;
        self.pending += 1;
        self.last_issued = Some(self.local.clone());
        SaveTicket {
            key,
            seq: self.next_seq,
            value: self.local.clone(),
        }
    }

    fn settle(&mut self, ticket: SaveTicket, succeeded: bool) -> SaveOutcome {
        self.pending = self.pending.saturating_sub(1);
        if !succeeded {
            return SaveOutcome::Failed;
        }
        if ticket.seq <= self.applied_seq {
            return SaveOutcome::Superseded;
        }
        self.applied_seq = ticket.seq;
        self.saved = Some(ticket.value);
        SaveOutcome::Applied
    }
}

//
// ─── CACHE ─────────────────────────────────────────────────────────────────────
//

/// Local answers keyed by question. Each entry is confirmed independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerCache {
    entries: HashMap<QuestionId, AnswerEntry>,
}

impl AnswerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the remote record; every stored answer starts confirmed.
    #[must_use]
    pub fn seeded(answers: &[StoredAnswer]) -> Self {
        let entries = answers
            .iter()
            .map(|a| (a.question_id, AnswerEntry::confirmed(a.value.clone())))
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, question: QuestionId) -> Option<&AnswerEntry> {
        self.entries.get(&question)
    }

    /// Replace the local value, creating a draft entry if needed.
    pub fn edit(&mut self, question: QuestionId, value: AnswerValue) {
        match self.entries.get_mut(&question) {
            Some(entry) => entry.edit(value),
            None => {
                self.entries.insert(question, AnswerEntry::draft(value));
            }
        }
    }

    /// Start saving the current local value. `None` if nothing was entered.
    pub fn begin_save(&mut self, question: QuestionId) -> Option<SaveTicket> {
        self.entries
            .get_mut(&question)
            .map(|entry| entry.begin_save(SlotKey::Question(question)))
    }

    /// Apply a settled save. Tickets for other slots are reported as superseded.
    pub fn settle(&mut self, ticket: SaveTicket, succeeded: bool) -> SaveOutcome {
        let SlotKey::Question(question) = ticket.key else {
            return SaveOutcome::Superseded;
        };
        match self.entries.get_mut(&question) {
            Some(entry) => entry.settle(ticket, succeeded),
            None => SaveOutcome::Superseded,
        }
    }

    /// Questions with unconfirmed, non-blank local content.
    pub fn unsaved(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.has_unsaved_content())
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (QuestionId, &AnswerEntry)> + '_ {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The single essay slot of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EssayDraft {
    exam_unit_id: ExamUnitId,
    entry: AnswerEntry,
}

impl EssayDraft {
    #[must_use]
    pub fn empty(exam_unit_id: ExamUnitId) -> Self {
        Self {
            exam_unit_id,
            entry: AnswerEntry::draft(AnswerValue::Text(String::new())),
        }
    }

    /// Seed from the remote essay, confirmed.
    #[must_use]
    pub fn from_stored(essay: &StoredEssay) -> Self {
        Self {
            exam_unit_id: essay.exam_unit_id,
            entry: AnswerEntry::confirmed(AnswerValue::Text(essay.text.clone())),
        }
    }

    #[must_use]
    pub fn exam_unit_id(&self) -> ExamUnitId {
        self.exam_unit_id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        self.entry.local().as_text().unwrap_or_default()
    }

    #[must_use]
    pub fn entry(&self) -> &AnswerEntry {
        &self.entry
    }

    pub fn edit(&mut self, text: impl Into<String>) {
        self.entry.edit(AnswerValue::Text(text.into()));
    }

    pub fn begin_save(&mut self) -> SaveTicket {
        self.entry.begin_save(SlotKey::Essay(self.exam_unit_id))
    }

    pub fn settle(&mut self, ticket: SaveTicket, succeeded: bool) -> SaveOutcome {
        if ticket.key != SlotKey::Essay(self.exam_unit_id) {
            return SaveOutcome::Superseded;
        }
        self.entry.settle(ticket, succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> AnswerValue {
        AnswerValue::Text(s.to_owned())
    }

    fn alt(id: u64) -> AnswerValue {
        AnswerValue::Alternative(AlternativeId::new(id))
    }

    #[test]
    fn seeded_entries_are_confirmed() {
        let q = QuestionId::new(1);
        let cache = AnswerCache::seeded(&[StoredAnswer {
            question_id: q,
            value: text("draft text"),
        }]);
        let entry = cache.get(q).unwrap();
        assert!(entry.is_confirmed());
        assert_eq!(entry.local(), &text("draft text"));
        assert_eq!(entry.status(), SaveStatus::Saved);
    }

    #[test]
    fn edit_after_save_unconfirms_without_losing_saved_value() {
        let q = QuestionId::new(1);
        let mut cache = AnswerCache::new();
        cache.edit(q, text("first"));
        let ticket = cache.begin_save(q).unwrap();
        assert_eq!(cache.get(q).unwrap().status(), SaveStatus::Saving);
        assert_eq!(cache.settle(ticket, true), SaveOutcome::Applied);

        cache.edit(q, text("second"));
        let entry = cache.get(q).unwrap();
        assert!(!entry.is_confirmed());
        assert_eq!(entry.saved(), Some(&text("first")));
        assert_eq!(entry.status(), SaveStatus::Unsaved);
    }

    #[test]
    fn failed_save_leaves_entry_unconfirmed() {
        let q = QuestionId::new(1);
        let mut cache = AnswerCache::new();
        cache.edit(q, alt(3));
        let ticket = cache.begin_save(q).unwrap();
        assert_eq!(cache.settle(ticket, false), SaveOutcome::Failed);

        let entry = cache.get(q).unwrap();
        assert!(!entry.is_confirmed());
        assert!(entry.has_unsaved_content());
        assert_eq!(cache.unsaved().collect::<Vec<_>>(), vec![q]);
    }

    #[test]
    fn switching_alternatives_keeps_one_confirmed_entry() {
        let q = QuestionId::new(1);
        let mut cache = AnswerCache::new();
        cache.edit(q, alt(1));
        let first = cache.begin_save(q).unwrap();
        cache.settle(first, true);
        cache.edit(q, alt(2));
        let second = cache.begin_save(q).unwrap();
        cache.settle(second, true);

        assert_eq!(cache.len(), 1);
        let entry = cache.get(q).unwrap();
        assert!(entry.is_confirmed());
        assert_eq!(entry.saved(), Some(&alt(2)));
    }

    #[test]
    fn stale_completion_does_not_confirm_older_text() {
        let mut essay = EssayDraft::empty(ExamUnitId::new(4));
        essay.edit("one");
        let older = essay.begin_save();
        essay.edit("two");
        let newer = essay.begin_save();

        assert_eq!(essay.settle(newer, true), SaveOutcome::Applied);
        assert_eq!(essay.settle(older, true), SaveOutcome::Superseded);

        assert_eq!(essay.text(), "two");
        assert!(essay.entry().is_confirmed());
        assert_eq!(essay.entry().saved(), Some(&text("two")));
    }

    #[test]
    fn older_completion_first_then_newer_confirms_latest() {
        let mut essay = EssayDraft::empty(ExamUnitId::new(4));
        essay.edit("one");
        let older = essay.begin_save();
        essay.edit("two");
        let newer = essay.begin_save();

        essay.settle(older, true);
        assert!(!essay.entry().is_confirmed());
        assert_eq!(essay.entry().status(), SaveStatus::Saving);

        essay.settle(newer, true);
        assert!(essay.entry().is_confirmed());
    }

    #[test]
    fn blank_drafts_are_not_unsaved_work() {
        let mut essay = EssayDraft::empty(ExamUnitId::new(4));
        assert_eq!(essay.entry().status(), SaveStatus::Empty);
        essay.edit("   ");
        assert!(!essay.entry().has_unsaved_content());
    }
}

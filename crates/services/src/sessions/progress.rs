use serde::Serialize;

/// Aggregated view of attempt progress, useful for UI.
///
/// The essay slot counts as one slot next to the questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    pub total: usize,
    /// Slots whose last acknowledged value is non-blank.
    pub answered: usize,
    /// Slots holding local content the store has not acknowledged.
    pub unsaved: usize,
    pub percent: u8,
}

impl SessionProgress {
    pub(crate) fn tally(total: usize, answered: usize, unsaved: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            u8::try_from(answered.min(total) * 100 / total).unwrap_or(100)
        };
        Self {
            total,
            answered,
            unsaved,
            percent,
        }
    }

    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.total.saturating_sub(self.answered)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.answered >= self.total
    }
}

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::grade_parser::total_marks;
use crate::models::{ExamField, ExamUpdate, GradingResult, QuestionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftState {
    /// Populated from a model response, never persisted
    UnsavedFromAi,
    /// Persisted breakdown and total agree
    Saved,
    /// A mark or comment changed locally; the stored total is stale
    ManuallyEdited,
}

/// Editable per-question marks for one student's exam slot.
///
/// `commit` is the single place a total is computed for persistence.
#[derive(Debug, Clone)]
pub struct BreakdownDraft {
    exam: ExamField,
    records: Vec<QuestionRecord>,
    stored_total: Option<i64>,
    state: DraftState,
}

impl BreakdownDraft {
    pub fn from_ai(exam: ExamField, result: GradingResult) -> Self {
        Self {
            exam,
            records: result.breakdown,
            stored_total: None,
            state: DraftState::UnsavedFromAi,
        }
    }

    /// Loads what is on record; a drifted stored total is shown as-is until the next commit
    pub fn from_saved(exam: ExamField, records: Vec<QuestionRecord>, stored_total: Option<i64>) -> Self {
        Self {
            exam,
            records,
            stored_total,
            state: DraftState::Saved,
        }
    }

    /// A breakdown submitted wholesale by a client counts as a manual edit
    pub fn from_submission(exam: ExamField, records: Vec<QuestionRecord>, stored_total: Option<i64>) -> Self {
        Self {
            exam,
            records,
            stored_total,
            state: DraftState::ManuallyEdited,
        }
    }

    pub fn exam(&self) -> ExamField {
        self.exam
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn records(&self) -> &[QuestionRecord] {
        &self.records
    }

    pub fn stored_total(&self) -> Option<i64> {
        self.stored_total
    }

    pub fn total_preview(&self) -> i64 {
        total_marks(&self.records)
    }

    pub fn set_marks(&mut self, index: usize, marks: i64) -> Result<()> {
        let record = self.record_mut(index)?;
        record.marks = marks;
        self.state = DraftState::ManuallyEdited;
        Ok(())
    }

    pub fn set_comment(&mut self, index: usize, comment: impl Into<String>) -> Result<()> {
        let record = self.record_mut(index)?;
        record.comment = comment.into();
        self.state = DraftState::ManuallyEdited;
        Ok(())
    }

    /// Recompute the total from the in-memory marks and produce the write to perform
    pub fn commit(&self) -> ExamUpdate {
        ExamUpdate {
            exam: self.exam,
            total: self.total_preview(),
            breakdown: self.records.clone(),
        }
    }

    pub fn mark_saved(&mut self, total: i64) {
        self.stored_total = Some(total);
        self.state = DraftState::Saved;
    }

    fn record_mut(&mut self, index: usize) -> Result<&mut QuestionRecord> {
        let len = self.records.len();
        self.records
            .get_mut(index)
            .ok_or_else(|| anyhow!("Question index {} out of range for {} records", index, len))
    }
}

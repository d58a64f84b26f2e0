use mk_core::{GenerationError, Program};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Accepted,
    UnresolvableOperator,
    ShapeConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub detail: String,
}

impl AttemptRecord {
    #[must_use]
    pub fn accepted(attempt: u32, program: &Program) -> Self {
        Self {
            attempt,
            outcome: AttemptOutcome::Accepted,
            detail: format!(
                "{} source(s), {} instruction(s), {} fetch(es)",
                program.sources.len(),
                program.len(),
                program.fetches.len()
            ),
        }
    }

    /// Record for a retryable failure; `None` for errors that end the run.
    #[must_use]
    pub fn rejected(attempt: u32, err: &GenerationError) -> Option<Self> {
        let outcome = match err {
            GenerationError::UnresolvableOperator { .. } => AttemptOutcome::UnresolvableOperator,
            GenerationError::ShapeConflict { .. } => AttemptOutcome::ShapeConflict,
            _ => return None,
        };
        Some(Self {
            attempt,
            outcome,
            detail: err.to_string(),
        })
    }
}

/// Per-spec record of every generation attempt, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLedger {
    entries: Vec<AttemptRecord>,
}

impl GenerationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: AttemptRecord) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[AttemptRecord] {
        &self.entries
    }

    #[must_use]
    pub fn accepted_attempt(&self) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.outcome == AttemptOutcome::Accepted)
            .map(|entry| entry.attempt)
    }

    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome != AttemptOutcome::Accepted)
            .count()
    }
}

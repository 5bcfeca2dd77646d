//! Step-by-step outcome of a best-effort operation

use serde::{Deserialize, Serialize};

/// Accumulated outcome of a teardown. Warnings never abort the run; they are
/// collected here and shown at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub succeeded: Vec<StepRecord>,
    pub warnings: Vec<StepRecord>,
    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl Report {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn add_success(&mut self, step: String, message: String) {
        self.succeeded.push(StepRecord { step, message });
    }

    pub fn add_warning(&mut self, step: String, message: String) {
        tracing::warn!(step = %step, "{}", message);
        self.warnings.push(StepRecord { step, message });
    }

    pub fn merge(&mut self, other: Report) {
        self.succeeded.extend(other.succeeded);
        self.warnings.extend(other.warnings);
        self.duration_ms += other.duration_ms;
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub message: String,
}

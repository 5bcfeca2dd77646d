//! Multi-phase infra apply with a fixed retry bound
//!
//! A [`StagePlan`] is an ordered list of phases, each scoped to a set of
//! target selectors. A phase is attempted at most `max_attempts` times with a
//! fixed delay in between; when the last attempt fails the whole plan stops
//! with [`ToolError::PhaseFailed`]. Phases are never skipped.
//!
//! Auxiliary steps between phases (fetching cluster credentials, API health
//! checks) belong to the caller, which runs phases one at a time with
//! [`StagedApplier::run_phase`].

use crate::error::{Result, ToolError};
use crate::runner::CommandOutput;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Something that can apply a set of targets (terraform in production).
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Apply `targets`, or everything when empty. Non-zero exits are returned.
    async fn apply_targets(&self, targets: &[String]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePhase {
    pub name: String,
    pub targets: Vec<String>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Non-zero exit codes that still count as success.
    pub tolerated_exit_codes: Vec<i32>,
}

impl StagePhase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
            max_attempts: 1,
            retry_delay: Duration::from_secs(20),
            tolerated_exit_codes: Vec::new(),
        }
    }

    pub fn target(mut self, selector: impl Into<String>) -> Self {
        self.targets.push(selector.into());
        self
    }

    pub fn attempts(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = retry_delay;
        self
    }

    pub fn tolerate(mut self, code: i32) -> Self {
        self.tolerated_exit_codes.push(code);
        self
    }

    fn accepts(&self, output: &CommandOutput) -> bool {
        match output.code {
            Some(0) => true,
            Some(code) => self.tolerated_exit_codes.contains(&code),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePlan {
    pub phases: Vec<StagePhase>,
}

impl StagePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: StagePhase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn get(&self, name: &str) -> Option<&StagePhase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.max_attempts == 0 {
                return Err(ToolError::InvalidPlan(format!(
                    "phase '{}' allows zero attempts",
                    phase.name
                )));
            }
            if self.phases[..i].iter().any(|p| p.name == phase.name) {
                return Err(ToolError::InvalidPlan(format!(
                    "duplicate phase '{}'",
                    phase.name
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one completed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub name: String,
    pub attempts: u32,
    pub duration: Duration,
    /// Tail of the final attempt's output.
    pub output_tail: String,
}

pub struct StagedApplier<'a> {
    executor: &'a dyn PhaseExecutor,
}

impl<'a> StagedApplier<'a> {
    pub fn new(executor: &'a dyn PhaseExecutor) -> Self {
        Self { executor }
    }

    /// Run every phase in order, stopping at the first exhausted phase.
    pub async fn run(&self, plan: &StagePlan) -> Result<Vec<PhaseReport>> {
        plan.validate()?;
        let mut reports = Vec::with_capacity(plan.phases.len());
        for phase in &plan.phases {
            reports.push(self.run_phase(phase).await?);
        }
        Ok(reports)
    }

    pub async fn run_phase(&self, phase: &StagePhase) -> Result<PhaseReport> {
        if phase.max_attempts == 0 {
            return Err(ToolError::InvalidPlan(format!(
                "phase '{}' allows zero attempts",
                phase.name
            )));
        }

        let start = Instant::now();
        let mut last_error = String::new();
        for attempt in 1..=phase.max_attempts {
            tracing::info!(
                phase = %phase.name,
                attempt,
                max_attempts = phase.max_attempts,
                targets = ?phase.targets,
                "applying phase"
            );

            match self.executor.apply_targets(&phase.targets).await {
                Ok(output) if phase.accepts(&output) => {
                    let elapsed = start.elapsed();
                    tracing::info!(
                        phase = %phase.name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "phase applied"
                    );
                    return Ok(PhaseReport {
                        name: phase.name.clone(),
                        attempts: attempt,
                        duration: elapsed,
                        output_tail: output.tail(10),
                    });
                }
                Ok(output) => {
                    last_error = format!(
                        "exit code {}: {}",
                        output.code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
                        output.tail(10)
                    );
                }
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(phase = %phase.name, attempt, error = %last_error, "phase attempt failed");
            if attempt < phase.max_attempts {
                tracing::info!(
                    phase = %phase.name,
                    delay_secs = phase.retry_delay.as_secs(),
                    "retrying phase"
                );
                tokio::time::sleep(phase.retry_delay).await;
            }
        }

        Err(ToolError::PhaseFailed {
            phase: phase.name.clone(),
            attempts: phase.max_attempts,
            last_error,
        })
    }
}

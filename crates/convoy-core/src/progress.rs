//! Operator-facing progress output
//!
//! Each pipeline step prints a timestamped start line and a result line
//! with its duration; a summary block closes the run.

use crate::error::{CoreError, Result};
use chrono::Local;
use colored::Colorize;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum StepResult {
    Success { duration: Duration },
    Warning { message: String, duration: Duration },
    Failed { error: String, duration: Duration },
}

impl StepResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Success { duration }
            | Self::Warning { duration, .. }
            | Self::Failed { duration, .. } => *duration,
        }
    }
}

pub struct StepLogger {
    start_time: Instant,
    step_results: Vec<(String, StepResult)>,
    current_step: Option<(String, Instant)>,
}

impl StepLogger {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            step_results: Vec::new(),
            current_step: None,
        }
    }

    pub fn start_step(&mut self, name: impl Into<String>) {
        let name = name.into();
        println!("[{}] {} {}", timestamp().dimmed(), "▶".cyan(), name);
        self.current_step = Some((name, Instant::now()));
    }

    pub fn step_success(&mut self, message: Option<&str>) {
        if let Some((name, start)) = self.current_step.take() {
            let duration = start.elapsed();
            println!(
                "[{}] {} {} ({})",
                timestamp().dimmed(),
                "✓".green().bold(),
                message.unwrap_or(&name),
                format_duration(duration).dimmed()
            );
            self.step_results.push((name, StepResult::Success { duration }));
        }
    }

    /// The step finished but something was left behind.
    pub fn step_warning(&mut self, message: &str) {
        if let Some((name, start)) = self.current_step.take() {
            let duration = start.elapsed();
            println!(
                "[{}] {} {}: {}",
                timestamp().dimmed(),
                "⚠".yellow().bold(),
                name,
                message.yellow()
            );
            self.step_results.push((
                name,
                StepResult::Warning {
                    message: message.to_string(),
                    duration,
                },
            ));
        }
    }

    pub fn step_failed(&mut self, error: &str) {
        if let Some((name, start)) = self.current_step.take() {
            let duration = start.elapsed();
            println!(
                "[{}] {} {}: {}",
                timestamp().dimmed(),
                "✗".red().bold(),
                name,
                error.red()
            );
            self.step_results.push((
                name,
                StepResult::Failed {
                    error: error.to_string(),
                    duration,
                },
            ));
        }
    }

    /// Run `fut` as one step. Its error ends the step as failed and is
    /// returned.
    pub async fn track<T, E, F>(&mut self, name: impl Into<String>, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<CoreError>,
    {
        self.start_step(name);
        match fut.await {
            Ok(value) => {
                self.step_success(None);
                Ok(value)
            }
            Err(e) => {
                let err = e.into();
                self.step_failed(&err.to_string());
                Err(err)
            }
        }
    }

    /// Like [`track`](Self::track), but an error only produces a warning.
    pub async fn track_soft<T, E, F>(&mut self, name: impl Into<String>, fut: F) -> Option<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.start_step(name);
        match fut.await {
            Ok(value) => {
                self.step_success(None);
                Some(value)
            }
            Err(e) => {
                self.step_warning(&e.to_string());
                None
            }
        }
    }

    /// Warning messages recorded so far, as `step: message`.
    pub fn warnings(&self) -> Vec<String> {
        self.step_results
            .iter()
            .filter_map(|(name, r)| match r {
                StepResult::Warning { message, .. } => Some(format!("{}: {}", name, message)),
                _ => None,
            })
            .collect()
    }

    pub fn log_detail(&self, message: &str) {
        println!("[{}]   → {}", timestamp().dimmed(), message.cyan());
    }

    pub fn warning_count(&self) -> usize {
        self.step_results
            .iter()
            .filter(|(_, r)| matches!(r, StepResult::Warning { .. }))
            .count()
    }

    pub fn all_success(&self) -> bool {
        !self.step_results.iter().any(|(_, r)| r.is_failure())
    }

    pub fn results(&self) -> &[(String, StepResult)] {
        &self.step_results
    }

    pub fn print_summary(&self, title: &str) {
        let total = self.start_time.elapsed();
        let failures = self.step_results.iter().filter(|(_, r)| r.is_failure()).count();
        let slowest = self
            .step_results
            .iter()
            .max_by_key(|(_, r)| r.duration());

        println!();
        println!("{}", "═".repeat(44));
        println!("Summary: {}", title.cyan().bold());
        println!("{}", "─".repeat(44));
        println!("Total time:    {}", format_duration(total).green());
        if let Some((name, result)) = slowest {
            println!("Slowest step:  {} ({})", name, format_duration(result.duration()));
        }
        match self.warning_count() {
            0 => println!("Warnings:      0"),
            n => println!("Warnings:      {}", n.to_string().yellow()),
        }
        match failures {
            0 => println!("Errors:        {}", "0".green()),
            n => println!("Errors:        {}", n.to_string().red().bold()),
        }
        println!("{}", "═".repeat(44));
    }
}

impl Default for StepLogger {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs >= 1 {
        format!("{}.{}s", total_secs, millis / 100)
    } else {
        format!("{}ms", millis)
    }
}

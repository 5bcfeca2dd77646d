//! External tool error types

use convoy_cloud::CloudError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0} not found. Please install it and make sure it is on PATH")]
    NotInstalled(String),

    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("phase '{phase}' failed after {attempts} attempt(s): {last_error}")]
    PhaseFailed {
        phase: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid stage plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;

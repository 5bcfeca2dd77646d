//! Cloud lifecycle error types

use std::time::Duration;
use thiserror::Error;

/// How a caller should treat a failed cloud operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The desired end state already holds (duplicate rule, already deleted).
    Benign,
    /// Transient; another attempt may succeed.
    Retryable,
    /// Abort the run.
    Fatal,
}

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Dependency violation: {0}")]
    DependencyViolation(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("No image matches OS version {0}")]
    NoMatchingImage(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Instance {0} terminated while waiting for it to run")]
    InstanceLost(String),

    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CloudError::NotFound(_) | CloudError::Duplicate(_) => Severity::Benign,
            CloudError::Timeout { .. } => Severity::Retryable,
            _ => Severity::Fatal,
        }
    }

    pub fn is_benign(&self) -> bool {
        self.severity() == Severity::Benign
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CloudError::Duplicate(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

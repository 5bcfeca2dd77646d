//! Pipeline error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Cloud(#[from] convoy_cloud::CloudError),

    #[error(transparent)]
    Tool(#[from] convoy_tools::ToolError),

    #[error(transparent)]
    Config(#[from] convoy_config::ConfigError),

    #[error("Invalid pipeline arguments: {0}")]
    InvalidArgs(String),

    #[error("Unknown pipeline '{name}'. Available: {available}")]
    UnknownPipeline { name: String, available: String },

    #[error("Invalid pipeline registry: {0}")]
    InvalidRegistry(String),

    #[error("{0}")]
    Precondition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

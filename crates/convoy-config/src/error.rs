use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set. Export it or add it to your .env file")]
    MissingVar(String),

    #[error("{what} not found at {}", path.display())]
    MissingFile { what: String, path: PathBuf },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("{}: cannot parse '{text}'", path.display())]
    EnvFileSyntax { path: PathBuf, text: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

use thiserror::Error;

use super::pysource::SyntaxError;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("Strategy '{name}' returned invalid output: {reason}")]
    InvalidOutput { name: String, reason: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, StrategyError>;

use std::path::PathBuf;
use thiserror::Error;

use crate::strategy::StrategyError;

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Reasoning service error: {0}")]
    Service(String),

    #[error("Service invoked unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("Task '{task}' exhausted its budget of {rounds} tool rounds")]
    BudgetExhausted { task: String, rounds: usize },

    #[error("Task '{task}' interrupted")]
    Interrupted {
        task: String,
        snapshot: Option<PathBuf>,
    },

    #[error("Tool '{0}' only carries structured output and cannot be executed")]
    TerminalToolExecuted(String),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl ScoutError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ScoutError::Interrupted { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;

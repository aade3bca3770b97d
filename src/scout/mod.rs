// Scout modules: reasoning service, tools and the town workflow
pub mod analyzer;
pub mod claude;
pub mod error;
pub mod interrupt;
pub mod service;
pub mod task_handler;
pub mod toolkit;
pub mod tools;

pub use analyzer::{normalize_state, starting_snapshot, TownAnalyzer};
pub use claude::ClaudeClient;
pub use error::{Result, ScoutError};
pub use interrupt::InterruptFlag;
pub use service::ReasoningService;
pub use task_handler::{Task, TaskHandler};
pub use toolkit::{Tool, ToolRegistry};

pub mod agenda;
pub mod snapshot;
pub mod strategy;
pub mod transcript;

pub use agenda::Meeting;
pub use snapshot::{Committee, RunSnapshot, SCHEMA_VERSION};
pub use strategy::StrategySpec;
pub use transcript::{
    CacheControl, ContentBlock, InterruptedTranscript, Role, ToolInvocation, Transcript, Turn,
};

pub mod builtin;
pub mod diff;
pub mod error;
pub mod harness;
pub mod interpreter;
pub mod pysource;
pub mod registry;
pub mod script;
pub mod synthesis;

pub use error::{Result, StrategyError};
pub use harness::{ValidationHarness, ValidationResult};
pub use interpreter::PythonInterpreter;
pub use registry::{FetchingStrategy, Origin, Registration, StrategyRegistry};
pub use synthesis::{StrategySynthesizer, SynthesizedStrategy};

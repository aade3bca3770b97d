use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{Result, StrategyError};

const MAX_STREAM_CHARS: usize = 8_192;

/// Output of one interpreter run.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The Python interpreter used to run proposed and synthesized strategies.
#[derive(Debug, Clone)]
pub struct PythonInterpreter {
    program: String,
    timeout: Duration,
}

impl PythonInterpreter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the interpreter can be started at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Run `script` with `args`. The child is killed if it outlives the timeout.
    pub async fn run_script(&self, script: &Path, args: &[&Path]) -> Result<ScriptOutput> {
        let mut command = Command::new(&self.program);
        command
            .arg(script)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("Running {} {}", self.program, script.display());
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(StrategyError::Runner(format!(
                    "failed to start {}: {}",
                    self.program, err
                )))
            }
            Err(_) => {
                warn!(
                    "{} exceeded {}s running {}",
                    self.program,
                    self.timeout.as_secs(),
                    script.display()
                );
                return Err(StrategyError::Timeout {
                    program: self.program.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        Ok(ScriptOutput {
            stdout: clip(&String::from_utf8_lossy(&output.stdout)),
            stderr: clip(&String::from_utf8_lossy(&output.stderr)),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

pub(crate) fn clip(value: &str) -> String {
    let trimmed = value.trim();
    let mut iter = trimmed.chars();
    let mut collected: String = iter.by_ref().take(MAX_STREAM_CHARS).collect();
    if iter.next().is_some() {
        collected.push_str("\n[truncated]");
    }
    collected
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::diff::{self, Diff};
use super::error::{Result, StrategyError};
use super::interpreter::{clip, PythonInterpreter};

/// Compiles the snippet, runs it in a fresh namespace with output captured,
/// calls its only function with the supplied values and writes a JSON report.
const DRIVER: &str = r#"import contextlib
import io
import json
import sys
import traceback
import types

NAMESPACE = "__proposed__"


def write(path, report):
    try:
        text = json.dumps(report, default=str, allow_nan=False)
    except (TypeError, ValueError) as exc:
        report["exception"] = "%s: return value is not JSON serializable: %s" % (type(exc).__name__, exc)
        report["output"] = None
        text = json.dumps(report, default=str)
    with open(path, "w", encoding="utf-8") as fh:
        fh.write(text)


def main():
    code_path, values_path, report_path = sys.argv[1:4]
    with open(code_path, encoding="utf-8") as fh:
        source = fh.read()
    with open(values_path, encoding="utf-8") as fh:
        values = json.load(fh)

    report = {"phase": "syntax", "log": "", "exception": None, "output": None}
    try:
        compiled = compile(source, "<proposed>", "exec")
    except SyntaxError as exc:
        report["exception"] = "%s: %s (line %s)" % (type(exc).__name__, exc.msg, exc.lineno)
        write(report_path, report)
        return

    report["phase"] = "execute"
    buffer = io.StringIO()
    namespace = {"__name__": NAMESPACE}
    try:
        with contextlib.redirect_stdout(buffer), contextlib.redirect_stderr(buffer):
            exec(compiled, namespace)
            functions = [
                value
                for value in namespace.values()
                if isinstance(value, types.FunctionType) and value.__module__ == NAMESPACE
            ]
            if len(functions) != 1:
                names = ", ".join(sorted(f.__name__ for f in functions)) or "none"
                raise RuntimeError(
                    "no callable found: expected exactly one function, found %d (%s)"
                    % (len(functions), names)
                )
            report["output"] = functions[0](**values)
    except BaseException:
        report["exception"] = traceback.format_exc()
        report["output"] = None
    report["log"] = buffer.getvalue()
    write(report_path, report)


main()
"#;

/// Outcome of one validation attempt. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub log: String,
    pub exception: Option<String>,
    pub diff: Diff,
    pub actual_output: Option<Value>,
}

impl ValidationResult {
    /// A run that produced no output to compare.
    fn failure(message: String) -> Self {
        Self {
            passed: false,
            log: String::new(),
            exception: Some(message),
            diff: Diff::default(),
            actual_output: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriverReport {
    phase: String,
    #[serde(default)]
    log: String,
    exception: Option<String>,
    output: Option<Value>,
}

/// Executes proposed strategy code and checks it against an expected result.
///
/// This is a correctness check only. The snippet runs with the same network
/// and filesystem access as the interpreter itself.
#[derive(Debug, Clone)]
pub struct ValidationHarness {
    interpreter: PythonInterpreter,
}

impl ValidationHarness {
    pub fn new(interpreter: PythonInterpreter) -> Self {
        Self { interpreter }
    }

    pub fn interpreter(&self) -> &PythonInterpreter {
        &self.interpreter
    }

    pub async fn validate(
        &self,
        code: &str,
        values: &Map<String, Value>,
        expected: &Value,
    ) -> Result<ValidationResult> {
        let workdir = tempfile::tempdir()?;
        let code_path = workdir.path().join("proposed.py");
        let values_path = workdir.path().join("values.json");
        let report_path = workdir.path().join("report.json");
        let driver_path = workdir.path().join("driver.py");
        std::fs::write(&code_path, code)?;
        std::fs::write(&values_path, serde_json::to_vec(values)?)?;
        std::fs::write(&driver_path, DRIVER)?;

        let run = self
            .interpreter
            .run_script(&driver_path, &[code_path.as_path(), values_path.as_path(), report_path.as_path()])
            .await;
        let output = match run {
            Ok(output) => output,
            Err(StrategyError::Timeout { program, seconds }) => {
                warn!("Proposed code did not finish within {}s", seconds);
                return Ok(ValidationResult::failure(format!(
                    "TimeoutError: {program} did not finish within {seconds}s"
                )));
            }
            Err(err) => return Err(err),
        };

        // the snippet can end the process itself (os._exit, a crash) before the driver reports
        let report: DriverReport = match std::fs::read(&report_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(_) => {
                warn!("Validation driver exited with {} and wrote no report", output.exit_code);
                let mut message = format!("process exited with code {} before reporting", output.exit_code);
                if !output.stderr.is_empty() {
                    message.push_str(": ");
                    message.push_str(&output.stderr);
                }
                return Ok(ValidationResult::failure(message));
            }
        };

        if report.phase == "syntax" {
            let message = report
                .exception
                .unwrap_or_else(|| "SyntaxError: invalid syntax".to_string());
            return Ok(ValidationResult::failure(message));
        }

        let actual_output = if report.exception.is_some() {
            None
        } else {
            Some(report.output.unwrap_or(Value::Null))
        };
        let diff = diff::compare(expected, actual_output.as_ref().unwrap_or(&Value::Null));
        let passed = report.exception.is_none() && diff.is_empty();
        info!(
            "Validation {} ({} difference(s))",
            if passed { "passed" } else { "failed" },
            diff.len()
        );

        Ok(ValidationResult {
            passed,
            log: clip(&report.log),
            exception: report.exception,
            diff,
            actual_output,
        })
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::shared::models::Meeting;

use super::error::{Result, StrategyError};
use super::interpreter::PythonInterpreter;
use super::pysource::{self, StatementKind};
use super::registry::{meetings_from_value, FetchingStrategy};
use super::synthesis::package_name;

/// Base class every strategy module subclasses.
pub const BASE_CLASS: &str = "FetchingStrategy";

const INIT_PY: &str = r#""""Agenda fetching strategies.

Every module in this package is scanned by agenda-scout at startup. A strategy
is a FetchingStrategy subclass with a unique ``name`` whose ``fetch`` takes
its parameters as keyword arguments and returns a list of
{"date": ..., "agenda": ...} dictionaries.
"""


class FetchingStrategy:
    name = None

    def fetch(self, **params):
        raise NotImplementedError
"#;

/// Imports one strategy module, calls `fetch(**values)` and writes a JSON report.
const RUNNER: &str = r#"import importlib
import json
import sys
import traceback


def main():
    root, package, module_name, class_name, values_path, report_path = sys.argv[1:7]
    sys.path.insert(0, root)
    with open(values_path, encoding="utf-8") as fh:
        values = json.load(fh)

    report = {"output": None, "exception": None}
    try:
        module = importlib.import_module(package + "." + module_name)
        strategy = getattr(module, class_name)()
        report["output"] = strategy.fetch(**values)
    except BaseException:
        report["exception"] = traceback.format_exc()
    with open(report_path, "w", encoding="utf-8") as fh:
        json.dump(report, fh, default=str)


main()
"#;

/// Create the strategies package with its base class if it does not exist yet.
pub fn ensure_package(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let init = dir.join("__init__.py");
    if !init.exists() {
        std::fs::write(&init, INIT_PY)?;
        info!("Initialized strategies package at {}", dir.display());
    }
    Ok(())
}

/// A strategy defined by a Python class in the strategies package.
#[derive(Debug, Clone)]
pub struct ScriptStrategy {
    name: String,
    class_name: String,
    module_path: PathBuf,
    interpreter: PythonInterpreter,
}

impl ScriptStrategy {
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        module_path: impl Into<PathBuf>,
        interpreter: PythonInterpreter,
    ) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            module_path: module_path.into(),
            interpreter,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn module_path(&self) -> &Path {
        &self.module_path
    }
}

#[derive(Debug, Deserialize)]
struct RunnerReport {
    output: Option<Value>,
    exception: Option<String>,
}

#[async_trait]
impl FetchingStrategy for ScriptStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, params: &Map<String, Value>) -> Result<Vec<Meeting>> {
        let package_dir = self
            .module_path
            .parent()
            .ok_or_else(|| StrategyError::Runner(format!("{} has no package", self.module_path.display())))?;
        let root = match package_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let module_name = self
            .module_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| StrategyError::Runner(format!("bad module path {}", self.module_path.display())))?;

        let workdir = tempfile::tempdir()?;
        let runner = workdir.path().join("runner.py");
        let values = workdir.path().join("values.json");
        let report_path = workdir.path().join("report.json");
        std::fs::write(&runner, RUNNER)?;
        std::fs::write(&values, serde_json::to_vec(params)?)?;

        let package = PathBuf::from(package_name(package_dir));
        let module = PathBuf::from(module_name);
        let class = PathBuf::from(&self.class_name);
        let output = self
            .interpreter
            .run_script(
                &runner,
                &[
                    root.as_path(),
                    package.as_path(),
                    module.as_path(),
                    class.as_path(),
                    values.as_path(),
                    report_path.as_path(),
                ],
            )
            .await?;
        if !output.stdout.is_empty() {
            debug!("{} stdout: {}", self.name, output.stdout);
        }

        let report: RunnerReport = match std::fs::read(&report_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(_) => {
                return Err(StrategyError::Runner(format!(
                    "strategy runner exited with {} and no report: {}",
                    output.exit_code, output.stderr
                )))
            }
        };
        if let Some(trace) = report.exception {
            return Err(StrategyError::Fetch(format!("{} raised:\n{}", self.name, trace)));
        }
        meetings_from_value(&self.name, report.output.unwrap_or(Value::Null))
    }
}

/// Scan the strategies package for strategy classes.
///
/// Modules that fail to parse are skipped with a warning so one bad file does
/// not hide the others.
pub fn discover(dir: &Path, interpreter: &PythonInterpreter) -> Result<Vec<ScriptStrategy>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| StrategyError::Io(std::io::Error::other(err.to_string())))?;
        let path = entry.path();
        let is_module = entry.file_type().is_file()
            && path.extension().and_then(|e| e.to_str()) == Some("py")
            && path.file_name().and_then(|n| n.to_str()) != Some("__init__.py");
        if !is_module {
            continue;
        }

        let source = std::fs::read_to_string(path)?;
        let module = match pysource::parse_module(&source) {
            Ok(module) => module,
            Err(err) => {
                warn!("Skipping strategy module {}: {}", path.display(), err);
                continue;
            }
        };

        let mut base_names = vec![BASE_CLASS.to_string()];
        for statement in &module.body {
            if let StatementKind::FromImport { names, .. } = &statement.kind {
                base_names.extend(
                    names
                        .iter()
                        .filter(|n| n.name == BASE_CLASS)
                        .map(|n| n.bound_name().to_string()),
                );
            }
        }

        for class in module.classes() {
            let StatementKind::ClassDef { name: class_name, bases } = &class.kind else {
                continue;
            };
            let derives = bases.iter().any(|base| {
                base_names.iter().any(|b| b == base) || base.ends_with(&format!(".{BASE_CLASS}"))
            });
            if !derives {
                continue;
            }
            let name = class
                .class_attribute("name")
                .unwrap_or_else(|| class_name.clone());
            debug!("Discovered strategy {} ({}) in {}", name, class_name, path.display());
            found.push(ScriptStrategy::new(name, class_name.clone(), path, interpreter.clone()));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::StrategySpec;
    use crate::strategy::harness::ValidationHarness;
    use crate::strategy::synthesis::StrategySynthesizer;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn interpreter() -> PythonInterpreter {
        PythonInterpreter::new("python3", Duration::from_secs(30))
    }

    #[test]
    fn package_init_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("strategies");
        ensure_package(&package).unwrap();
        std::fs::write(package.join("__init__.py"), "# customised\n").unwrap();
        ensure_package(&package).unwrap();
        assert_eq!(std::fs::read_to_string(package.join("__init__.py")).unwrap(), "# customised\n");
    }

    #[test]
    fn discovers_subclasses_with_names() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("strategies");
        ensure_package(&package).unwrap();
        std::fs::write(
            package.join("tables.py"),
            "from strategies import FetchingStrategy as Base\n\n\nclass Helper:\n    name = \"not_a_strategy\"\n\n\nclass FilteredTable(Base):\n    name = \"filtered_table\"\n\n    def fetch(self, url):\n        return []\n\n\nclass Unnamed(Base):\n    def fetch(self):\n        return []\n",
        )
        .unwrap();
        std::fs::write(package.join("broken.py"), "class Oops(FetchingStrategy:\n").unwrap();
        std::fs::write(package.join("notes.txt"), "class X(FetchingStrategy): pass\n").unwrap();

        let found = discover(&package, &interpreter()).unwrap();
        let names: Vec<(&str, &str)> = found.iter().map(|s| (s.name(), s.class_name())).collect();
        assert_eq!(names, vec![("filtered_table", "FilteredTable"), ("Unnamed", "Unnamed")]);
    }

    #[test]
    fn missing_directory_discovers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("absent"), &interpreter()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn synthesized_strategy_reproduces_validated_output() {
        let interpreter = interpreter();
        if !interpreter.is_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("strategies");
        let values = json!({"base": "https://town.gov/pc", "dates": ["2024-01-08", "2024-02-12"]});
        let spec = StrategySpec {
            committee_name: Some("Planning Commission".into()),
            strategy_name: "dated_pdfs".into(),
            schema: BTreeMap::from([
                ("base".to_string(), "Folder holding agendas".to_string()),
                ("dates".to_string(), "Meeting dates".to_string()),
            ]),
            values: values.as_object().cloned().unwrap(),
            code: "def get_committee_agendas(base, dates):\n    return [{\"date\": d, \"agenda\": f\"{base}/{d}.pdf\"} for d in dates]\n".into(),
            notes: None,
        };
        StrategySynthesizer::new(&package).synthesize(&spec).unwrap();

        let found = discover(&package, &interpreter).unwrap();
        assert_eq!(found.len(), 1);
        let meetings = found[0].fetch(&spec.values).await.unwrap();
        assert_eq!(meetings.len(), 2);
        assert_eq!(meetings[0].date, "2024-01-08");
        assert_eq!(meetings[0].agenda, "https://town.gov/pc/2024-01-08.pdf");
    }

    #[tokio::test]
    async fn module_preamble_survives_validate_synthesize_fetch() {
        let interpreter = interpreter();
        if !interpreter.is_available().await {
            return;
        }
        let code = r#""""Dated agendas in the planning folder."""
from __future__ import annotations

KIND = "pdf"

match KIND:
    case "pdf":
        SUFFIX = ".pdf"
    case _:
        SUFFIX = ".html"


# One link per meeting date.
def get_committee_agendas(base: str, dates: list[str]) -> list[dict]:
    return [{"date": d, "agenda": f"{base}/{d}{SUFFIX}"} for d in dates]
"#;
        let values = json!({"base": "https://town.gov/pc", "dates": ["2024-01-08", "2024-02-12"]});
        let expected = json!([
            {"date": "2024-01-08", "agenda": "https://town.gov/pc/2024-01-08.pdf"},
            {"date": "2024-02-12", "agenda": "https://town.gov/pc/2024-02-12.pdf"}
        ]);
        let spec = StrategySpec {
            committee_name: Some("Planning Commission".into()),
            strategy_name: "future_pdfs".into(),
            schema: BTreeMap::new(),
            values: values.as_object().cloned().unwrap(),
            code: code.into(),
            notes: None,
        };

        let harness = ValidationHarness::new(interpreter.clone());
        let result = harness.validate(&spec.code, &spec.values, &expected).await.unwrap();
        assert!(result.passed, "{result:?}");

        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("strategies");
        let written = StrategySynthesizer::new(&package).synthesize(&spec).unwrap();
        let source = std::fs::read_to_string(&written.path).unwrap();
        assert!(source.contains("    # One link per meeting date.\n    def fetch(self, base: str"));

        let found = discover(&package, &interpreter).unwrap();
        assert_eq!(found.len(), 1);
        let meetings = found[0].fetch(&spec.values).await.unwrap();
        assert_eq!(serde_json::to_value(&meetings).unwrap(), expected);
    }

    #[tokio::test]
    async fn raising_strategy_is_a_fetch_error() {
        let interpreter = interpreter();
        if !interpreter.is_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("strategies");
        ensure_package(&package).unwrap();
        std::fs::write(
            package.join("flaky.py"),
            "from strategies import FetchingStrategy\n\n\nclass Flaky(FetchingStrategy):\n    name = \"flaky\"\n\n    def fetch(self):\n        raise RuntimeError(\"site is down\")\n",
        )
        .unwrap();

        let found = discover(&package, &interpreter).unwrap();
        let err = found[0].fetch(&Map::new()).await.unwrap_err();
        assert!(matches!(err, StrategyError::Fetch(ref trace) if trace.contains("site is down")));
    }
}

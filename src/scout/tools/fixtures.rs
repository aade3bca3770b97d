use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::scout::error::{Result, ScoutError};
use crate::scout::toolkit::Tool;
use crate::shared::models::Meeting;

pub const STORE_EXPECTED_AGENDAS: &str = "store_expected_agendas";

/// Expected agendas per committee, one JSON file each.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    dir: PathBuf,
}

impl FixtureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `Planning Commission` -> `planning_commission`
    pub fn slug(name: &str) -> String {
        name.trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                ' ' | '/' | '\\' => '_',
                other => other,
            })
            .collect()
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::slug(name)))
    }

    pub fn store(&self, name: &str, meetings: &[Meeting]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        std::fs::write(&path, serde_json::to_string_pretty(meetings)?)?;
        info!("Stored {} expected agendas for {} at {}", meetings.len(), name, path.display());
        Ok(path)
    }

    /// The stored fixture as raw JSON, the form the harness compares against.
    pub fn load_value(&self, name: &str) -> Result<Value> {
        let path = self.path_for(name);
        let data = std::fs::read_to_string(&path).map_err(|err| {
            ScoutError::Fixture(format!(
                "no expected agendas for '{}' at {}: {}",
                name,
                path.display(),
                err
            ))
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn load(&self, name: &str) -> Result<Vec<Meeting>> {
        Ok(serde_json::from_value(self.load_value(name)?)?)
    }
}

#[derive(Debug, Deserialize)]
struct StoreArgs {
    name: String,
    meetings: Vec<Meeting>,
}

/// Records the agendas a committee has published so far as the expected
/// output for its strategy.
pub struct StoreExpectedAgendasTool {
    store: FixtureStore,
}

impl StoreExpectedAgendasTool {
    pub fn new(store: FixtureStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StoreExpectedAgendasTool {
    fn name(&self) -> &str {
        STORE_EXPECTED_AGENDAS
    }

    fn description(&self) -> &str {
        "Store all the agendas for a committee. They are saved as the expected result \
         that proposed strategies for this committee are tested against."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "The committee name"},
                "meetings": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "date": {"type": "string", "description": "Meeting date, YYYY-MM-DD"},
                            "agenda": {
                                "type": "string",
                                "description": "Link to the agenda, either an HTML page or a PDF/other file"
                            }
                        },
                        "required": ["date", "agenda"]
                    }
                }
            },
            "required": ["name", "meetings"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let args: StoreArgs = serde_json::from_value(args.clone())
            .map_err(|e| ScoutError::InvalidInput(format!("{}: {}", STORE_EXPECTED_AGENDAS, e)))?;
        let path = self.store.store(&args.name, &args.meetings)?;
        Ok(json!({
            "stored": args.meetings.len(),
            "path": path.display().to_string(),
        }))
    }
}

use anyhow::{Context, Result};
use chrono::Utc;
use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub name: String,
    #[serde(default)]
    pub overview_url: Option<String>,
    #[serde(default)]
    pub agendas_url: Option<String>,
    #[serde(default)]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub meeting_details: Option<Value>,
    #[serde(default)]
    pub fetching_strategy: Option<Value>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl Committee {
    pub fn is_resolved(&self) -> bool {
        self.meeting_details.is_some() && self.fetching_strategy.is_some()
    }
}

/// Findings for one town, written after every run so the next run can resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    #[serde(default = "current_version")]
    pub schema_version: u32,
    pub town_name: String,
    pub state: String,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub agendas_url: Option<String>,
    #[serde(default)]
    pub committees: Option<Vec<Committee>>,
}

fn current_version() -> u32 {
    SCHEMA_VERSION
}

impl RunSnapshot {
    pub fn new(town_name: &str, state: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            town_name: town_name.to_string(),
            state: state.to_string(),
            website_url: None,
            agendas_url: None,
            committees: None,
        }
    }

    /// `<output>/<STATE>/<town>`
    pub fn run_dir(output_dir: &Path, state: &str, town_name: &str) -> PathBuf {
        output_dir.join(state).join(town_name)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(format!(
            "s{}_{}.json",
            SCHEMA_VERSION,
            Utc::now().format("%Y-%m-%dT%H-%M-%S%.6f")
        ));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// Most recently written snapshot of the current schema version, if any.
    pub fn load_latest(dir: &Path) -> Result<Option<(PathBuf, RunSnapshot)>> {
        if !dir.exists() {
            return Ok(None);
        }
        let matcher = Glob::new(&format!("s{}_*.json", SCHEMA_VERSION))?.compile_matcher();

        let mut latest: Option<(SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry?;
            if !matcher.is_match(entry.file_name()) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let newer = latest
                .as_ref()
                .map(|(seen, path)| {
                    modified > *seen || (modified == *seen && entry.path() > *path)
                })
                .unwrap_or(true);
            if newer {
                latest = Some((modified, entry.path()));
            }
        }

        let Some((_, path)) = latest else {
            return Ok(None);
        };
        let data = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let snapshot: RunSnapshot =
            serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some((path, snapshot)))
    }
}

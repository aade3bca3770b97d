use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_RELATIVE_DIR: &str = ".config/agenda-scout";
const CONFIG_FILE: &str = "config.json";

/// Settings given on the command line or through the environment. They take
/// precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub python: Option<String>,
    pub max_tool_rounds: Option<usize>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_anthropic_version")]
    pub anthropic_version: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound on service round-trips for a single task.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_strategies_dir")]
    pub strategies_dir: PathBuf,
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_harness_timeout_secs")]
    pub harness_timeout_secs: u64,
    #[serde(default = "default_scraper_timeout_secs")]
    pub scraper_timeout_secs: u64,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_url: default_api_url(),
            anthropic_version: default_anthropic_version(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            output_dir: default_output_dir(),
            strategies_dir: default_strategies_dir(),
            fixtures_dir: default_fixtures_dir(),
            python: default_python(),
            harness_timeout_secs: default_harness_timeout_secs(),
            scraper_timeout_secs: default_scraper_timeout_secs(),
            log_dir: default_log_dir(),
            api_key: None,
        }
    }
}

impl ScoutConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let mut config: ScoutConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config JSON at {}", path.display()))?;

        config.model = config.model.trim().to_string();
        if config.model.is_empty() {
            config.model = default_model();
        }
        config.api_url = config.api_url.trim().trim_end_matches('/').to_string();
        if config.api_url.is_empty() {
            config.api_url = default_api_url();
        }
        if config.max_tool_rounds == 0 {
            return Err(anyhow!(
                "max_tool_rounds in {} must be at least 1",
                path.display()
            ));
        }
        Ok(config)
    }

    /// Load the config file if present, then layer `overrides` on top.
    /// Without an explicit path the file under the home directory is used.
    pub fn load(path: Option<PathBuf>, overrides: Overrides) -> Result<(Self, Option<PathBuf>)> {
        let path = resolve_config_path(path);
        let (mut config, source) = if path.exists() {
            (Self::load_from_path(&path)?, Some(path))
        } else {
            (Self::default(), None)
        };
        config.apply(overrides)?;
        Ok((config, source))
    }

    /// Blank values are ignored.
    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(model) = non_blank(overrides.model) {
            self.model = model;
        }
        if let Some(python) = non_blank(overrides.python) {
            self.python = python;
        }
        if let Some(rounds) = overrides.max_tool_rounds {
            if rounds == 0 {
                return Err(anyhow!("max tool rounds must be at least 1"));
            }
            self.max_tool_rounds = rounds;
        }
        if let Some(key) = non_blank(overrides.api_key) {
            self.api_key = Some(key);
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("an API key is required: set ANTHROPIC_API_KEY or pass --api-key"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn harness_timeout(&self) -> Duration {
        Duration::from_secs(self.harness_timeout_secs)
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper_timeout_secs)
    }

    pub fn interrupted_dir(&self) -> PathBuf {
        self.output_dir.join("interrupted")
    }
}

fn default_model() -> String {
    "claude-3-7-sonnet-20250219".to_string()
}

fn default_api_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_tool_rounds() -> usize {
    25
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_strategies_dir() -> PathBuf {
    PathBuf::from("strategies")
}

fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("strategies/expected")
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_harness_timeout_secs() -> u64 {
    120
}

fn default_scraper_timeout_secs() -> u64 {
    10
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("output/logs")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return expand_path(path.to_string_lossy().into_owned());
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_RELATIVE_DIR)
        .join(CONFIG_FILE)
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}

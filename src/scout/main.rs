use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[path = "../scout/mod.rs"]
mod scout;
#[path = "../shared/mod.rs"]
mod shared;
#[path = "../strategy/mod.rs"]
mod strategy;

use scout::tools::FixtureStore;
use scout::{normalize_state, starting_snapshot, ClaudeClient, InterruptFlag, ScoutError, TownAnalyzer};
use shared::config::{Overrides, ScoutConfig};
use shared::models::{RunSnapshot, StrategySpec};
use strategy::{Origin, PythonInterpreter, StrategyRegistry, StrategySynthesizer, ValidationHarness};

#[derive(Parser)]
#[command(name = "agenda-scout")]
#[command(about = "Discover municipal committees and build reusable agenda fetching strategies")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ~/.config/agenda-scout/config.json)
    #[arg(long, global = true, env = "SCOUT_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Model used for reasoning
    #[arg(long, global = true, env = "SCOUT_MODEL")]
    model: Option<String>,

    /// Python interpreter that runs strategies
    #[arg(long, global = true, env = "SCOUT_PYTHON")]
    python: Option<String>,

    /// Upper bound on service round-trips per task
    #[arg(long, global = true, env = "SCOUT_MAX_TOOL_ROUNDS")]
    max_tool_rounds: Option<usize>,

    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            python: self.python.clone(),
            max_tool_rounds: self.max_tool_rounds,
            api_key: self.api_key.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a town website and derive a fetching strategy per committee
    Discover {
        /// Name of the town to analyze
        town: String,
        /// Two-letter state code (e.g., VT, MA, NY)
        state: String,
        /// Start fresh instead of resuming from the latest saved state
        #[arg(long)]
        no_resume: bool,
    },
    /// Run a registered strategy and print the agendas it finds
    Fetch {
        strategy: String,
        /// JSON file with the strategy's values
        #[arg(long)]
        values: PathBuf,
    },
    /// Test a strategy proposal against a committee's stored agendas
    Validate {
        /// JSON file holding the proposal
        spec: PathBuf,
        #[arg(long)]
        committee: String,
    },
    /// Turn a strategy proposal into a module in the strategies package
    Synthesize {
        /// JSON file holding the proposal
        spec: PathBuf,
    },
    /// List registered strategies
    Strategies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = ScoutConfig::load(args.config.clone(), args.overrides())?;

    let _log_guards = shared::logging::init_service_logging(&config.log_dir, "agenda_scout")?;
    match &config_path {
        Some(path) => info!("Using config {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    match args.command {
        Command::Discover { town, state, no_resume } => discover(&config, &town, &state, !no_resume).await,
        Command::Fetch { strategy, values } => fetch(&config, &strategy, &values).await,
        Command::Validate { spec, committee } => validate(&config, &spec, &committee).await,
        Command::Synthesize { spec } => synthesize(&config, &spec),
        Command::Strategies => list_strategies(&config),
    }
}

fn interpreter(config: &ScoutConfig) -> PythonInterpreter {
    PythonInterpreter::new(config.python.clone(), config.harness_timeout())
}

fn load_registry(config: &ScoutConfig) -> Result<StrategyRegistry> {
    let http = reqwest::Client::builder()
        .timeout(config.scraper_timeout())
        .build()?;
    Ok(StrategyRegistry::load_all(&config.strategies_dir, &interpreter(config), http)?)
}

fn read_json(path: &Path) -> Result<Value> {
    let data = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

fn read_spec(path: &Path) -> Result<StrategySpec> {
    StrategySpec::from_value(read_json(path)?)
        .with_context(|| format!("{} is not a strategy proposal", path.display()))
}

async fn discover(config: &ScoutConfig, town: &str, state: &str, resume: bool) -> Result<()> {
    let state = normalize_state(state)?;
    let run_dir = RunSnapshot::run_dir(&config.output_dir, &state, town);
    let snapshot = starting_snapshot(&run_dir, town, &state, resume)?;

    let interrupt = InterruptFlag::install()?;
    let client = ClaudeClient::new(config)?;
    info!("Analyzing {}, {} with model {}", town, state, client.model());
    let mut analyzer = TownAnalyzer::from_config(config, Arc::new(client), interrupt, snapshot)?;

    match analyzer.run_and_save(&run_dir).await {
        Ok(_) => Ok(()),
        Err(ScoutError::Interrupted { task, snapshot }) => {
            warn!("Stopped during {}", task);
            if let Some(path) = snapshot {
                warn!("Transcript saved to {}", path.display());
            }
            std::process::exit(130);
        }
        Err(err) => {
            error!("Discovery for {}, {} failed: {}", town, state, err);
            Err(err.into())
        }
    }
}

async fn fetch(config: &ScoutConfig, name: &str, values_path: &Path) -> Result<()> {
    let registry = load_registry(config)?;
    let values: Map<String, Value> = match read_json(values_path)? {
        Value::Object(map) => map,
        _ => return Err(anyhow!("{} must hold a JSON object", values_path.display())),
    };
    let meetings = registry.get_agendas(name, &values).await?;
    info!("{} returned {} meetings", name, meetings.len());
    println!("{}", serde_json::to_string_pretty(&meetings)?);
    Ok(())
}

async fn validate(config: &ScoutConfig, spec_path: &Path, committee: &str) -> Result<()> {
    let spec = read_spec(spec_path)?;
    let expected = FixtureStore::new(config.fixtures_dir.clone()).load_value(committee)?;
    let harness = ValidationHarness::new(interpreter(config));
    let result = harness.validate(&spec.code, &spec.values, &expected).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.passed {
        std::process::exit(1);
    }
    Ok(())
}

fn synthesize(config: &ScoutConfig, spec_path: &Path) -> Result<()> {
    let spec = read_spec(spec_path)?;
    let synthesized = StrategySynthesizer::new(config.strategies_dir.clone()).synthesize(&spec)?;
    info!(
        "Wrote {} as class {} to {}",
        synthesized.name,
        synthesized.class_name,
        synthesized.path.display()
    );
    Ok(())
}

fn list_strategies(config: &ScoutConfig) -> Result<()> {
    let registry = load_registry(config)?;
    for registration in registry.registrations() {
        match &registration.origin {
            Origin::Builtin => println!("{}\tbuiltin", registration.name),
            Origin::Script(path) => println!("{}\t{}", registration.name, path.display()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_are_accepted_after_the_subcommand() {
        let args = Args::try_parse_from([
            "agenda-scout",
            "fetch",
            "document_links_on_page",
            "--values",
            "values.json",
            "--python",
            "/usr/bin/python3.12",
            "--max-tool-rounds",
            "5",
        ])
        .unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.python.as_deref(), Some("/usr/bin/python3.12"));
        assert_eq!(overrides.max_tool_rounds, Some(5));
        assert!(matches!(args.command, Command::Fetch { .. }));
    }

    #[test]
    fn malformed_round_budget_is_rejected() {
        assert!(Args::try_parse_from(["agenda-scout", "strategies", "--max-tool-rounds", "many"]).is_err());
    }
}

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::shared::config::ScoutConfig;
use crate::shared::models::{Committee, RunSnapshot, StrategySpec};
use crate::strategy::script::ScriptStrategy;
use crate::strategy::{
    PythonInterpreter, Registration, StrategyRegistry, StrategySynthesizer, SynthesizedStrategy,
    ValidationHarness,
};

use super::error::{Result, ScoutError};
use super::interrupt::InterruptFlag;
use super::service::ReasoningService;
use super::task_handler::{Task, TaskHandler};
use super::toolkit::ToolRegistry;
use super::tools::outputs::{ALL_ORGS_SUMMARY, COMMITTEE_MEETING_TIMES_SUMMARY, FETCHING_STRATEGY_SUMMARY};
use super::tools::scraper::SCRAPE_WEBPAGE;
use super::tools::test_strategy::TEST_PROPOSED_STRATEGY;
use super::tools::{FixtureStore, OutputTool, SiteScraperTool, StoreExpectedAgendasTool, TestProposedStrategyTool};

const STRATEGY_THINKING_BUDGET: u32 = 2_000;

const SITE_SYSTEM_PROMPT: &str = "You are a helpful research assistant. Answer ONLY with the requested information.";

const ANALYST_SYSTEM_PROMPT: &str = "You are an expert in analyzing municipal government websites. \
Use the provided tools to extract information about town committees. You have access to tools, \
but only use them when necessary. If a tool is not required, respond as normal.";

const STRATEGIST_SYSTEM_PROMPT: &str = "You are a web scraping strategist who analyzes municipal \
websites and proposes machine-consumable strategies for locating the agendas of boards and \
committees. A downstream system runs your strategies unattended to collect every new agenda. \
You may define a custom schema for each committee based on how its data is structured, but the \
schema must be programmatically useful. Use the provided tools only when necessary.";

/// Walks one town from its name to a tested fetching strategy per committee.
///
/// Findings accumulate in a [`RunSnapshot`] so an interrupted or failed run
/// can pick up where it stopped.
pub struct TownAnalyzer {
    handler: TaskHandler,
    interpreter: PythonInterpreter,
    harness: ValidationHarness,
    fixtures: FixtureStore,
    synthesizer: StrategySynthesizer,
    registry: StrategyRegistry,
    scraper_timeout: Duration,
    snapshot: RunSnapshot,
}

impl TownAnalyzer {
    pub fn from_config(
        config: &ScoutConfig,
        service: Arc<dyn ReasoningService>,
        interrupt: InterruptFlag,
        snapshot: RunSnapshot,
    ) -> Result<Self> {
        let interpreter = PythonInterpreter::new(config.python.clone(), config.harness_timeout());
        let http = reqwest::Client::builder()
            .timeout(config.scraper_timeout())
            .build()?;
        let registry = StrategyRegistry::load_all(&config.strategies_dir, &interpreter, http)?;

        Ok(Self {
            handler: TaskHandler::new(
                service,
                interrupt,
                config.interrupted_dir(),
                config.max_tool_rounds,
            ),
            harness: ValidationHarness::new(interpreter.clone()),
            interpreter,
            fixtures: FixtureStore::new(config.fixtures_dir.clone()),
            synthesizer: StrategySynthesizer::new(config.strategies_dir.clone()),
            registry,
            scraper_timeout: config.scraper_timeout(),
            snapshot,
        })
    }

    pub fn snapshot(&self) -> &RunSnapshot {
        &self.snapshot
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    fn location(&self) -> String {
        format!("{}, {}", self.snapshot.town_name, self.snapshot.state)
    }

    /// Scraper instances keep their own history, so each task gets a new one.
    fn scraper(&self) -> Result<SiteScraperTool> {
        SiteScraperTool::new(self.scraper_timeout)
    }

    pub async fn find_town_website(&mut self) -> Result<()> {
        let prompt = format!(
            "What is the official government website for {}?\n\
             Please return only the URL without any additional text or explanation.",
            self.location()
        );
        let tools = ToolRegistry::new();
        let task = Task::new("find_town_website", SITE_SYSTEM_PROMPT, &prompt, &tools).max_tokens(100);
        let result = self.handler.run(&task).await?;

        let url = ["website_url", "url", "summary"]
            .iter()
            .find_map(|key| result.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ScoutError::Service(format!("No website URL found for {}", self.location())))?;

        info!("Found website: {}", url);
        self.snapshot.website_url = Some(url.to_string());
        Ok(())
    }

    pub async fn find_town_orgs(&mut self) -> Result<()> {
        let website = self.snapshot.website_url.clone().unwrap_or_default();
        let prompt = format!(
            "The official town website for {location} is {website}\n\
             Analyze the town website to find:\n\n\
             1. The URL for agendas and/or minutes for all orgs. This is not specific to one org. It may not exist.\n\
             2. All boards, committees, and commissions.\n\
             3. The URL of a webpage with specific information about each group.\n\n\
             Use the {SCRAPE_WEBPAGE} tool to help with this analysis. Start by examining the main page, \
             then follow navigation elements or links that lead to committees or government sections.\n\n\
             A municipal website may have all agendas on a single page, a single page that links out to \
             each group, or a separate agendas page per group. Each organization may use a different \
             page structure.\n\n\
             Return your findings using the {ALL_ORGS_SUMMARY} tool.",
            location = self.location(),
        );
        let tools = ToolRegistry::new()
            .with(self.scraper()?)
            .with(OutputTool::all_orgs_summary());
        let task = Task::new("find_town_orgs", ANALYST_SYSTEM_PROMPT, &prompt, &tools);
        let result = self.handler.run(&task).await?;

        self.snapshot.agendas_url = non_empty(result.get("agendas_url"));
        let committees = committees_from(&result);
        info!("Found {} committees for {}", committees.len(), self.location());
        self.snapshot.committees = Some(committees);
        Ok(())
    }

    pub async fn find_meeting_details(&self, committee: &Committee) -> Result<Value> {
        let prompt = format!(
            "There is a municipal group, the {name} for {location}. This is a municipal board, committee, \
             or commission.\n\n\
             There is an overview page that gives details for the organization at {overview}.\n\n\
             Find the meeting schedule and location for this group.\n\n\
             Some groups meet regularly and others only meet as needed. If the schedule and location are \
             not readily available, leave what cannot be found empty. No need to check specific documents.\n\n\
             Return your findings using the {COMMITTEE_MEETING_TIMES_SUMMARY} tool.",
            name = committee.name,
            location = self.location(),
            overview = committee.overview_url.as_deref().unwrap_or("(unknown)"),
        );
        let tools = ToolRegistry::new()
            .with(self.scraper()?)
            .with(OutputTool::committee_meeting_times_summary());
        let task = Task::new("find_org_meeting_details", ANALYST_SYSTEM_PROMPT, &prompt, &tools).max_tokens(1_000);
        self.handler.run(&task).await
    }

    pub async fn find_fetching_strategy(&self, committee: &Committee) -> Result<Value> {
        let schedule = committee
            .meeting_details
            .as_ref()
            .and_then(|details| details.get("schedule"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown");
        let prompt = format!(
            "Your task is to create a fetching strategy for a specific municipal group's meeting agendas.\n\n\
             <overview_url>{overview}</overview_url>\n\
             <committee_agendas_url>{committee_agendas}</committee_agendas_url>\n\
             <all_orgs_agendas_url>{all_agendas}</all_orgs_agendas_url>\n\
             <committee_name>{name}</committee_name>\n\
             <town_name>{town}</town_name>\n\
             <state>{state}</state>\n\
             <meeting_schedule>{schedule}</meeting_schedule>\n\n\
             Public bodies must publish their meeting agendas, referred to as \"agendas\" or \"minutes\", \
             somewhere on their website. Produce a strategy that finds future agendas by following the \
             same posting pattern, preferring logic over hardcoded values.\n\n\
             1. Analyze the pages with the {SCRAPE_WEBPAGE} tool.\n\
             2. Collect every existing agenda for the committee and store them with {store}.\n\
             3. Choose a strategy type and a snake case strategy name.\n\
             4. Define a minimal yet complete schema of fields, as generic as possible.\n\
             5. Write Python code defining a single function named get_committee_agendas that takes the \
                schema fields as keyword arguments and returns a list of {{\"date\": \"YYYY-MM-DD\", \
                \"agenda\": url}} objects. The code must not reference this committee directly.\n\
             6. Iterate on schema, values and code with the {TEST_PROPOSED_STRATEGY} tool until the \
                test passes.\n\n\
             Submit the passing strategy with the {FETCHING_STRATEGY_SUMMARY} tool.",
            overview = committee.overview_url.as_deref().unwrap_or(""),
            committee_agendas = committee.agendas_url.as_deref().unwrap_or(""),
            all_agendas = self.snapshot.agendas_url.as_deref().unwrap_or(""),
            name = committee.name,
            town = self.snapshot.town_name,
            state = self.snapshot.state,
            store = super::tools::fixtures::STORE_EXPECTED_AGENDAS,
        );
        let tools = ToolRegistry::new()
            .with(self.scraper()?)
            .with(StoreExpectedAgendasTool::new(self.fixtures.clone()))
            .with(TestProposedStrategyTool::new(self.harness.clone(), self.fixtures.clone()))
            .with(OutputTool::fetching_strategy_summary());
        let task = Task::new("find_org_agenda_fetching_strategy", STRATEGIST_SYSTEM_PROMPT, &prompt, &tools)
            .max_tokens(8_000)
            .thinking(STRATEGY_THINKING_BUDGET);
        self.handler.run(&task).await
    }

    /// Re-validate a proposed strategy against the committee's fixture and,
    /// if it passes, write it into the strategies package and register it.
    pub async fn commit_strategy(
        &mut self,
        committee: &Committee,
        proposal: &Value,
    ) -> Result<Option<SynthesizedStrategy>> {
        let mut spec = match StrategySpec::from_value(proposal.clone()) {
            Ok(spec) => spec,
            Err(err) => {
                warn!("Strategy for {} is not a usable proposal: {}", committee.name, err);
                return Ok(None);
            }
        };
        spec.committee_name.get_or_insert_with(|| committee.name.clone());

        let expected = self.fixtures.load_value(&committee.name)?;
        let result = self.harness.validate(&spec.code, &spec.values, &expected).await?;
        if !result.passed {
            warn!(
                "Strategy {} for {} failed re-validation: {}",
                spec.strategy_name,
                committee.name,
                result.exception.as_deref().unwrap_or("output differs from expected agendas")
            );
            return Ok(None);
        }

        let synthesized = self.synthesizer.synthesize(&spec)?;
        let replaced = self.registry.register(Registration::script(ScriptStrategy::new(
            synthesized.name.clone(),
            synthesized.class_name.clone(),
            synthesized.path.clone(),
            self.interpreter.clone(),
        )));
        info!(
            "Committed strategy {} ({}) to {}{}",
            synthesized.name,
            synthesized.class_name,
            synthesized.path.display(),
            if replaced { ", replacing the previous one" } else { "" }
        );
        Ok(Some(synthesized))
    }

    async fn analyze_committee(&mut self, committee: &mut Committee) -> Result<()> {
        if committee.meeting_details.is_none() {
            committee.meeting_details = Some(self.find_meeting_details(committee).await?);
        }
        if committee.fetching_strategy.is_none() {
            let proposal = self.find_fetching_strategy(committee).await?;
            committee.fetching_strategy = Some(proposal.clone());
            self.commit_strategy(committee, &proposal).await?;
        }
        Ok(())
    }

    /// Per-committee failures are logged and the next committee is tried.
    /// An interrupt ends the loop.
    async fn analyze_committees(&mut self, committees: &mut [Committee]) -> Result<()> {
        for committee in committees.iter_mut() {
            if let Some(reason) = &committee.skip_reason {
                debug!("Skipping {}: {}", committee.name, reason);
                continue;
            }
            if committee.is_resolved() {
                continue;
            }
            info!("Analyzing committee: {}", committee.name);
            match self.analyze_committee(committee).await {
                Ok(()) => {}
                Err(err) if err.is_interrupt() => return Err(err),
                Err(err) => error!("Failed to analyze {}: {}", committee.name, err),
            }
        }
        Ok(())
    }

    pub async fn run_workflow(&mut self) -> Result<()> {
        if self.snapshot.website_url.is_none() {
            self.find_town_website().await?;
        }
        if self.snapshot.committees.as_ref().map_or(true, Vec::is_empty) {
            self.find_town_orgs().await?;
        }

        let mut committees = self.snapshot.committees.take().unwrap_or_default();
        let outcome = self.analyze_committees(&mut committees).await;
        self.snapshot.committees = Some(committees);
        outcome
    }

    /// Run the workflow and save the snapshot whatever the outcome.
    pub async fn run_and_save(&mut self, run_dir: &Path) -> Result<Option<PathBuf>> {
        let outcome = self.run_workflow().await;
        let saved = match self.snapshot.save(run_dir) {
            Ok(path) => {
                info!("Saved run state to {}", path.display());
                Some(path)
            }
            Err(err) => {
                error!("Failed to save run state: {:#}", err);
                None
            }
        };
        outcome.map(|()| saved)
    }
}

/// Upper-case a two-letter state code.
pub fn normalize_state(state: &str) -> Result<String> {
    if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ScoutError::InvalidInput(format!(
            "State must be a valid 2-letter code (e.g., VT, MA, NY), got '{}'",
            state
        )));
    }
    Ok(state.to_ascii_uppercase())
}

/// The snapshot to start from: the latest saved one unless resuming is off.
pub fn starting_snapshot(run_dir: &Path, town_name: &str, state: &str, resume: bool) -> anyhow::Result<RunSnapshot> {
    if resume {
        if let Some((path, snapshot)) = RunSnapshot::load_latest(run_dir)? {
            info!("Resuming from: {}", path.display());
            return Ok(snapshot);
        }
    }
    Ok(RunSnapshot::new(town_name, state))
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn committees_from(result: &Value) -> Vec<Committee> {
    let Some(items) = result.get("committees").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let Some(name) = non_empty(item.get("name")) else {
                warn!("Ignoring committee without a name: {}", item);
                return None;
            };
            Some(Committee {
                name,
                overview_url: non_empty(item.get("overview_url")),
                agendas_url: non_empty(item.get("agendas_url")),
                skip_reason: None,
                meeting_details: None,
                fetching_strategy: None,
                details: None,
            })
        })
        .collect()
}

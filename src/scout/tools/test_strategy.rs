use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::scout::error::{Result, ScoutError};
use crate::scout::toolkit::Tool;
use crate::shared::models::StrategySpec;
use crate::strategy::ValidationHarness;

use super::fixtures::{FixtureStore, STORE_EXPECTED_AGENDAS};

pub const TEST_PROPOSED_STRATEGY: &str = "test_proposed_strategy";

/// Runs proposed strategy code against the committee's stored agendas.
///
/// A failing proposal is a normal result carrying the log, exception and
/// diff; only a missing fixture or a broken interpreter is an error.
pub struct TestProposedStrategyTool {
    harness: ValidationHarness,
    fixtures: FixtureStore,
}

impl TestProposedStrategyTool {
    pub fn new(harness: ValidationHarness, fixtures: FixtureStore) -> Self {
        Self { harness, fixtures }
    }
}

#[async_trait]
impl Tool for TestProposedStrategyTool {
    fn name(&self) -> &str {
        TEST_PROPOSED_STRATEGY
    }

    fn description(&self) -> &str {
        "Test a proposed fetching strategy by running its code with the given values and \
         comparing the result to the agendas stored with store_expected_agendas."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "committee_name": {"type": "string", "description": "Name of the committee being tested"},
                "strategy_name": {
                    "type": "string",
                    "description": "Concise snake case descriptor, e.g. embedded_html_links, filtered_table"
                },
                "schema": {
                    "type": "object",
                    "description": "Map of field names to descriptions",
                    "additionalProperties": {"type": "string"}
                },
                "values": {
                    "type": "object",
                    "description": "Map of schema field names to values for this committee",
                    "additionalProperties": true
                },
                "code": {
                    "type": "string",
                    "description": "Python source with one function taking the schema fields as keyword \
                                    arguments and returning a list of {date, agenda} objects. No \
                                    references specific to this committee."
                }
            },
            "required": ["committee_name", "strategy_name", "schema", "values", "code"]
        })
    }

    async fn execute(&self, args: &Value) -> Result<Value> {
        let spec = StrategySpec::from_value(args.clone())
            .map_err(|e| ScoutError::InvalidInput(format!("{}: {}", TEST_PROPOSED_STRATEGY, e)))?;
        let committee = spec.committee_name.as_deref().ok_or_else(|| {
            ScoutError::InvalidInput(format!("{}: committee_name is required", TEST_PROPOSED_STRATEGY))
        })?;

        let expected = self.fixtures.load_value(committee).map_err(|err| match err {
            ScoutError::Fixture(msg) => {
                ScoutError::Fixture(format!("{}; store them first with {}", msg, STORE_EXPECTED_AGENDAS))
            }
            other => other,
        })?;

        let result = self.harness.validate(&spec.code, &spec.values, &expected).await?;
        info!(
            "Strategy {} for {}: {}",
            spec.strategy_name,
            committee,
            if result.passed { "passed" } else { "failed" }
        );
        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::Meeting;
    use crate::strategy::PythonInterpreter;
    use std::time::Duration;

    fn tool(dir: &std::path::Path) -> TestProposedStrategyTool {
        let harness = ValidationHarness::new(PythonInterpreter::new("python3", Duration::from_secs(30)));
        TestProposedStrategyTool::new(harness, FixtureStore::new(dir))
    }

    fn proposal(code: &str) -> Value {
        json!({
            "committee_name": "Select Board",
            "strategy_name": "static_list",
            "schema": {"url": "listing page"},
            "values": {"url": "https://town.gov/agendas"},
            "code": code
        })
    }

    #[tokio::test]
    async fn missing_fixture_points_at_the_store_tool() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path()).execute(&proposal("def f(url):\n    return []\n")).await.unwrap_err();
        assert!(matches!(err, ScoutError::Fixture(msg) if msg.contains(STORE_EXPECTED_AGENDAS)));
    }

    #[tokio::test]
    async fn syntax_errors_come_back_as_failed_results() {
        if !PythonInterpreter::new("python3", Duration::from_secs(5)).is_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        FixtureStore::new(dir.path())
            .store(
                "Select Board",
                &[Meeting {
                    date: "2024-07-01".into(),
                    agenda: "https://town.gov/a.pdf".into(),
                }],
            )
            .unwrap();

        let result = tool(dir.path())
            .execute(&proposal("def get_committee_agendas(url)\n    return []\n"))
            .await
            .unwrap();

        assert_eq!(result["passed"], json!(false));
        assert!(result["exception"].as_str().unwrap().starts_with("SyntaxError"));
        assert_eq!(result["diff"], json!({}));
    }

    #[tokio::test]
    async fn committee_name_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = proposal("def f():\n    return []\n");
        args.as_object_mut().unwrap().remove("committee_name");
        let err = tool(dir.path()).execute(&args).await.unwrap_err();
        assert!(matches!(err, ScoutError::InvalidInput(_)));
    }
}

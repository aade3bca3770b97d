use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::shared::models::{InterruptedTranscript, Transcript};

use super::error::{Result, ScoutError};
use super::interrupt::InterruptFlag;
use super::service::{ReasoningService, ServiceRequest};
use super::toolkit::ToolRegistry;

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;
const DEFAULT_MAX_TOKENS: u32 = 4_000;

static JSON_OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json object pattern"));

/// One logical task for the engine.
#[derive(Clone)]
pub struct Task<'a> {
    pub name: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
    pub tools: &'a ToolRegistry,
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

impl<'a> Task<'a> {
    pub fn new(name: &'a str, system: &'a str, prompt: &'a str, tools: &'a ToolRegistry) -> Self {
        Self {
            name,
            system,
            prompt,
            tools,
            max_tokens: DEFAULT_MAX_TOKENS,
            thinking_budget: None,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn thinking(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }
}

/// Drives a task to completion against the reasoning service.
///
/// Each round sends the transcript and tool schemas, then dispatches the
/// first invocation in the reply. A terminal tool ends the task with its
/// input; a reply without invocations ends it with whatever JSON object the
/// text contains. The transcript lives only as long as one `run` call and is
/// written to disk only when the run is interrupted.
pub struct TaskHandler {
    service: Arc<dyn ReasoningService>,
    interrupt: InterruptFlag,
    interrupted_dir: PathBuf,
    max_rounds: usize,
}

impl TaskHandler {
    pub fn new(
        service: Arc<dyn ReasoningService>,
        interrupt: InterruptFlag,
        interrupted_dir: PathBuf,
        max_rounds: usize,
    ) -> Self {
        Self {
            service,
            interrupt,
            interrupted_dir,
            max_rounds,
        }
    }

    pub fn interrupt(&self) -> &InterruptFlag {
        &self.interrupt
    }

    pub async fn run(&self, task: &Task<'_>) -> Result<Value> {
        let schemas = task.tools.schemas();
        let mut transcript = Transcript::seeded(task.prompt);
        info!("Starting task {} with tools [{}]", task.name, task.tools.names().join(", "));

        for round in 1..=self.max_rounds {
            self.check_interrupt(task, &transcript)?;

            let request = ServiceRequest {
                task: task.name,
                system: task.system,
                turns: transcript.turns(),
                tools: &schemas,
                max_tokens: task.max_tokens,
                thinking_budget: task.thinking_budget,
            };
            debug!("Task {} round {}: {} turns", task.name, round, transcript.len());
            let response = self.service.respond(&request).await?;
            self.check_interrupt(task, &transcript)?;

            let Some(invocation) = response.first_invocation() else {
                info!("Task {} finished with a text reply after {} round(s)", task.name, round);
                return Ok(parse_free_text(&response.text()));
            };
            if response.invocation_count() > 1 {
                debug!(
                    "Task {} round {}: {} invocations, dispatching the first",
                    task.name,
                    round,
                    response.invocation_count()
                );
            }

            let tool = task.tools.get(&invocation.name).ok_or_else(|| {
                error!("Task {} invoked unknown tool {}", task.name, invocation.name);
                ScoutError::UnknownTool {
                    name: invocation.name.clone(),
                }
            })?;

            if tool.is_terminal() {
                info!("Task {} finished via {} after {} round(s)", task.name, invocation.name, round);
                return Ok(invocation.input);
            }

            info!("Task {} round {}: executing tool {}", task.name, round, invocation.name);
            let (result, is_error) = match tool.execute(&invocation.input).await {
                Ok(output) => (render_tool_output(&output), false),
                Err(err) => {
                    warn!("Tool {} failed: {}", invocation.name, err);
                    (err.to_string(), true)
                }
            };
            transcript.push_tool_round(&response.blocks, &invocation, result, is_error);
        }

        Err(ScoutError::BudgetExhausted {
            task: task.name.to_string(),
            rounds: self.max_rounds,
        })
    }

    /// Save the transcript and stop if an interrupt arrived.
    fn check_interrupt(&self, task: &Task<'_>, transcript: &Transcript) -> Result<()> {
        if !self.interrupt.is_raised() {
            return Ok(());
        }
        let snapshot = InterruptedTranscript::new(task.name, task.system, transcript);
        let saved = match snapshot.persist(&self.interrupted_dir) {
            Ok(path) => {
                warn!("Task {} interrupted, transcript saved to {}", task.name, path.display());
                Some(path)
            }
            Err(err) => {
                error!("Task {} interrupted, failed to save transcript: {}", task.name, err);
                None
            }
        };
        Err(ScoutError::Interrupted {
            task: task.name.to_string(),
            snapshot: saved,
        })
    }
}

/// Best-effort structured result from a reply that invoked no tool.
pub fn parse_free_text(text: &str) -> Value {
    match JSON_OBJECT_RE.find(text) {
        Some(found) => match serde_json::from_str::<Value>(found.as_str()) {
            Ok(value) => value,
            Err(err) => json!({
                "summary": text,
                "error": format!("could not parse JSON from reply: {}", err),
            }),
        },
        None => json!({ "summary": text }),
    }
}

fn render_tool_output(output: &Value) -> String {
    let rendered = match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= MAX_TOOL_OUTPUT_CHARS {
        return rendered;
    }
    let mut clipped: String = rendered.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
    clipped.push_str("\n[output truncated]");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scout::service::scripted::ScriptedService;
    use crate::scout::toolkit::{terminal_execution, Tool};
    use crate::shared::models::{ContentBlock, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Lookup {
        calls: Arc<AtomicUsize>,
        fail: bool,
        interrupt: Option<InterruptFlag>,
    }

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "Look something up"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"q": {"type": "string"}}})
        }
        async fn execute(&self, args: &Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(flag) = &self.interrupt {
                flag.raise();
            }
            if self.fail {
                return Err(ScoutError::InvalidInput("q is required".into()));
            }
            Ok(json!({"found": args["q"]}))
        }
    }

    struct Summary {
        executed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Summary {
        fn name(&self) -> &str {
            "summary"
        }
        fn description(&self) -> &str {
            "Final answer"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        fn is_terminal(&self) -> bool {
            true
        }
        async fn execute(&self, _args: &Value) -> Result<Value> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Err(terminal_execution(self.name()))
        }
    }

    struct Fixture {
        calls: Arc<AtomicUsize>,
        executed: Arc<AtomicUsize>,
        tools: ToolRegistry,
        dir: tempfile::TempDir,
    }

    fn fixture(fail: bool, interrupt: Option<InterruptFlag>) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new()
            .with(Lookup {
                calls: calls.clone(),
                fail,
                interrupt,
            })
            .with(Summary {
                executed: executed.clone(),
            });
        Fixture {
            calls,
            executed,
            tools,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn handler(service: Arc<ScriptedService>, flag: InterruptFlag, dir: &tempfile::TempDir, rounds: usize) -> TaskHandler {
        TaskHandler::new(service, flag, dir.path().to_path_buf(), rounds)
    }

    #[tokio::test]
    async fn terminal_tool_returns_its_input_without_executing() {
        let f = fixture(false, None);
        let service = Arc::new(
            ScriptedService::new()
                .then_tool("t1", "lookup", json!({"q": "clerk"}))
                .then_tool("t2", "summary", json!({"agendas_url": "https://town.gov/agendas"})),
        );
        let handler = handler(service.clone(), InterruptFlag::new(), &f.dir, 10);

        let task = Task::new("find_town_orgs", "system", "find the committees", &f.tools);
        let result = handler.run(&task).await.unwrap();

        assert_eq!(result, json!({"agendas_url": "https://town.gov/agendas"}));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.executed.load(Ordering::SeqCst), 0);
        assert_eq!(service.requests()[0].tools, vec!["lookup", "summary"]);
    }

    #[tokio::test]
    async fn tool_result_follows_its_invocation() {
        let f = fixture(false, None);
        let service = Arc::new(
            ScriptedService::new()
                .then(vec![
                    ContentBlock::Thinking {
                        thinking: "need data".into(),
                        signature: "sig".into(),
                    },
                    ContentBlock::ToolUse {
                        id: "t1".into(),
                        name: "lookup".into(),
                        input: json!({"q": "planning"}),
                    },
                    ContentBlock::ToolUse {
                        id: "t2".into(),
                        name: "lookup".into(),
                        input: json!({"q": "zoning"}),
                    },
                ])
                .then_text("done"),
        );
        let handler = handler(service.clone(), InterruptFlag::new(), &f.dir, 10);

        handler
            .run(&Task::new("t", "system", "go", &f.tools).thinking(2000))
            .await
            .unwrap();

        let requests = service.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].thinking_budget, Some(2000));
        let turns = &requests[1].turns;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(matches!(&turns[1].content[0], ContentBlock::Thinking { .. }));
        assert_eq!(turns[1].content.len(), 2);
        assert!(matches!(
            &turns[2].content[0],
            ContentBlock::ToolResult { tool_use_id, content, is_error: false }
                if tool_use_id == "t1" && content.contains("planning")
        ));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn free_text_is_parsed_or_wrapped() {
        let f = fixture(false, None);
        let service = Arc::new(
            ScriptedService::new()
                .then_text("The site is below.\n{\"website_url\": \"https://williston.gov\"}\nThanks")
                .then_text("I could not find it."),
        );
        let handler = handler(service, InterruptFlag::new(), &f.dir, 10);
        let task = Task::new("find_town_site", "system", "where?", &f.tools);

        assert_eq!(handler.run(&task).await.unwrap(), json!({"website_url": "https://williston.gov"}));
        assert_eq!(handler.run(&task).await.unwrap(), json!({"summary": "I could not find it."}));
    }

    #[test]
    fn malformed_json_keeps_the_text() {
        let value = parse_free_text("result: {not json}");
        assert_eq!(value["summary"], json!("result: {not json}"));
        assert!(value["error"].as_str().unwrap().contains("could not parse"));
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let f = fixture(false, None);
        let service = Arc::new(ScriptedService::new().then_tool("t1", "delete_everything", json!({})));
        let handler = handler(service, InterruptFlag::new(), &f.dir, 10);

        let err = handler.run(&Task::new("t", "s", "p", &f.tools)).await.unwrap_err();
        assert!(matches!(err, ScoutError::UnknownTool { name } if name == "delete_everything"));
    }

    #[tokio::test]
    async fn round_budget_is_enforced() {
        let f = fixture(false, None);
        let service = Arc::new(
            ScriptedService::new()
                .then_tool("1", "lookup", json!({"q": "a"}))
                .then_tool("2", "lookup", json!({"q": "b"}))
                .then_tool("3", "lookup", json!({"q": "c"})),
        );
        let handler = handler(service.clone(), InterruptFlag::new(), &f.dir, 2);

        let err = handler.run(&Task::new("loop", "s", "p", &f.tools)).await.unwrap_err();
        assert!(matches!(err, ScoutError::BudgetExhausted { rounds: 2, .. }));
        assert_eq!(service.requests().len(), 2);
    }

    #[tokio::test]
    async fn failing_tool_is_reported_back_as_error_result() {
        let f = fixture(true, None);
        let service = Arc::new(
            ScriptedService::new()
                .then_tool("t1", "lookup", json!({}))
                .then_tool("t2", "summary", json!({"ok": true})),
        );
        let handler = handler(service.clone(), InterruptFlag::new(), &f.dir, 10);

        let result = handler.run(&Task::new("t", "s", "p", &f.tools)).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
        let turns = &service.requests()[1].turns;
        assert!(matches!(
            &turns[2].content[0],
            ContentBlock::ToolResult { is_error: true, content, .. } if content.contains("q is required")
        ));
    }

    #[tokio::test]
    async fn service_errors_propagate_unretried() {
        let f = fixture(false, None);
        let service = Arc::new(ScriptedService::new().then_error("overloaded"));
        let handler = handler(service.clone(), InterruptFlag::new(), &f.dir, 10);

        let err = handler.run(&Task::new("t", "s", "p", &f.tools)).await.unwrap_err();
        assert!(matches!(err, ScoutError::Service(msg) if msg == "overloaded"));
        assert_eq!(service.requests().len(), 1);
    }

    #[tokio::test]
    async fn interrupt_persists_the_transcript() {
        let flag = InterruptFlag::new();
        let f = fixture(false, Some(flag.clone()));
        let service = Arc::new(
            ScriptedService::new()
                .then_tool("t1", "lookup", json!({"q": "planning"}))
                .then_text("never reached"),
        );
        let handler = handler(service.clone(), flag, &f.dir, 10);

        let err = handler
            .run(&Task::new("find_town_orgs", "be thorough", "go", &f.tools))
            .await
            .unwrap_err();

        let ScoutError::Interrupted { task, snapshot } = err else {
            panic!("expected an interrupt");
        };
        assert_eq!(task, "find_town_orgs");
        let saved: InterruptedTranscript =
            serde_json::from_str(&std::fs::read_to_string(snapshot.unwrap()).unwrap()).unwrap();
        assert_eq!(saved.system_prompt, "be thorough");
        assert_eq!(saved.turns.len(), 3);
        assert_eq!(service.requests().len(), 1);
    }

    #[test]
    fn long_tool_output_is_clipped() {
        let long = Value::String("x".repeat(MAX_TOOL_OUTPUT_CHARS + 5));
        assert!(render_tool_output(&long).ends_with("[output truncated]"));
        assert_eq!(render_tool_output(&json!({"a": 1})), "{\"a\":1}");
    }
}

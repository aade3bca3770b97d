use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::shared::config::ScoutConfig;
use crate::shared::models::{ContentBlock, Turn};

use super::error::{Result, ScoutError};
use super::service::{ReasoningService, ServiceRequest, ServiceResponse, ToolSchema};

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    system: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSchema]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<Value>,
    stop_reason: Option<String>,
}

/// Messages API client.
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    api_url: String,
    anthropic_version: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(config: &ScoutConfig) -> Result<Self> {
        let api_key = config
            .require_api_key()
            .map_err(|e| ScoutError::Config(e.to_string()))?
            .to_string();
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ScoutError::Service(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.clone(),
            anthropic_version: config.anthropic_version.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a ServiceRequest<'a>) -> MessagesRequest<'a> {
        let has_tools = !request.tools.is_empty();
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            // extended thinking rejects an explicit temperature
            temperature: request.thinking_budget.is_none().then_some(0.0),
            system: request.system,
            messages: request.turns,
            tools: has_tools.then_some(request.tools),
            tool_choice: has_tools.then_some(ToolChoice { kind: "auto" }),
            thinking: request.thinking_budget.map(|budget_tokens| Thinking {
                kind: "enabled",
                budget_tokens,
            }),
        }
    }
}

/// Keep the blocks the transcript understands; skip anything newer.
fn parse_blocks(content: Vec<Value>) -> Vec<ContentBlock> {
    content
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<ContentBlock>(raw.clone()) {
            Ok(block) => Some(block),
            Err(_) => {
                let kind = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or("unknown");
                warn!("Skipping unsupported content block: {}", kind);
                None
            }
        })
        .collect()
}

#[async_trait]
impl ReasoningService for ClaudeClient {
    async fn respond(&self, request: &ServiceRequest<'_>) -> Result<ServiceResponse> {
        let body = self.body(request);
        debug!(
            "Sending {} turns and {} tools for task {}",
            request.turns.len(),
            request.tools.len(),
            request.task
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.anthropic_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ScoutError::Service(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ScoutError::Service(format!("API error ({}): {}", status, error_text)));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ScoutError::Service(format!("Failed to parse response: {}", e)))?;
        debug!(
            "Task {} got {} blocks (stop reason {:?})",
            request.task,
            parsed.content.len(),
            parsed.stop_reason
        );

        Ok(ServiceResponse {
            blocks: parse_blocks(parsed.content),
            stop_reason: parsed.stop_reason,
        })
    }
}

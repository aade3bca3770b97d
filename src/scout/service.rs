use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::models::{ContentBlock, ToolInvocation, Turn};

use super::error::Result;

/// What the reasoning service is told about one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One request to the reasoning service. Tool choice is always "auto".
#[derive(Debug, Clone)]
pub struct ServiceRequest<'a> {
    pub task: &'a str,
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolSchema],
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub blocks: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl ServiceResponse {
    /// The first tool invocation in the response, if any.
    pub fn first_invocation(&self) -> Option<ToolInvocation> {
        self.blocks.iter().find_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
            .count()
    }

    /// All text blocks, joined.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A hosted model that reads a transcript and either answers or asks for a tool.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn respond(&self, request: &ServiceRequest<'_>) -> Result<ServiceResponse>;
}

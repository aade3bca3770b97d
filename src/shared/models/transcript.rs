use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheControl {
    Ephemeral,
}

/// One block of a turn, shaped exactly like the Messages API wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            cache_control: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// A capability invocation requested by the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Append-only history of one task's exchange with the reasoning service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// A transcript holding only the task prompt, marked cacheable.
    pub fn seeded(task_prompt: &str) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::User,
                content: vec![ContentBlock::Text {
                    text: task_prompt.to_string(),
                    cache_control: Some(CacheControl::Ephemeral),
                }],
            }],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record one dispatched invocation: the service turn that requested it,
    /// immediately followed by the caller turn carrying its result.
    ///
    /// Only the dispatched invocation is kept from the service turn, so every
    /// `tool_use` in the transcript has its `tool_result` right after it.
    pub fn push_tool_round(
        &mut self,
        service_blocks: &[ContentBlock],
        invocation: &ToolInvocation,
        result: String,
        is_error: bool,
    ) {
        let assistant: Vec<ContentBlock> = service_blocks
            .iter()
            .filter(|block| match block {
                ContentBlock::ToolUse { id, .. } => *id == invocation.id,
                _ => true,
            })
            .cloned()
            .collect();

        self.turns.push(Turn {
            role: Role::Assistant,
            content: assistant,
        });
        self.turns.push(Turn {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: invocation.id.clone(),
                content: result,
                is_error,
            }],
        });
    }
}

/// Everything needed to inspect or hand-resume a task that was interrupted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptedTranscript {
    pub task_name: String,
    pub system_prompt: String,
    pub turns: Vec<Turn>,
    pub interrupted_at: DateTime<Utc>,
}

impl InterruptedTranscript {
    pub fn new(task_name: &str, system_prompt: &str, transcript: &Transcript) -> Self {
        Self {
            task_name: task_name.to_string(),
            system_prompt: system_prompt.to_string(),
            turns: transcript.turns().to_vec(),
            interrupted_at: Utc::now(),
        }
    }

    /// Synchronous on purpose: this runs while the process is being interrupted.
    pub fn persist(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}_{}.json",
            self.task_name,
            self.interrupted_at.format("%Y%m%dT%H%M%S%.3f")
        ));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(id: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: "scrape_webpage".to_string(),
            input: json!({"url": "https://example.gov"}),
        }
    }

    #[test]
    fn seeded_prompt_carries_cache_hint() {
        let transcript = Transcript::seeded("find the committees");
        let wire = serde_json::to_value(transcript.turns()).unwrap();
        assert_eq!(
            wire,
            json!([{
                "role": "user",
                "content": [{
                    "type": "text",
                    "text": "find the committees",
                    "cache_control": {"type": "ephemeral"}
                }]
            }])
        );
    }

    #[test]
    fn tool_round_keeps_result_adjacent_to_its_invocation() {
        let mut transcript = Transcript::seeded("task");
        let blocks = vec![
            ContentBlock::text("checking two pages"),
            ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "scrape_webpage".into(),
                input: json!({}),
            },
            ContentBlock::ToolUse {
                id: "call_2".into(),
                name: "scrape_webpage".into(),
                input: json!({}),
            },
        ];

        transcript.push_tool_round(&blocks, &invocation("call_1"), "{}".into(), false);

        let turns = transcript.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::Assistant);
        let tool_uses: Vec<&str> = turns[1]
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tool_uses, vec!["call_1"]);
        assert_eq!(turns[2].role, Role::User);
        assert!(matches!(
            &turns[2].content[0],
            ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "call_1"
        ));
    }

    #[test]
    fn error_results_are_flagged_on_the_wire() {
        let mut transcript = Transcript::default();
        transcript.push_tool_round(&[], &invocation("call_9"), "boom".into(), true);
        let wire = serde_json::to_value(&transcript.turns()[1]).unwrap();
        assert_eq!(wire["content"][0]["is_error"], json!(true));
    }

    #[test]
    fn interrupted_transcript_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = Transcript::seeded("long task");
        let snapshot = InterruptedTranscript::new("find_town_orgs", "be helpful", &transcript);

        let path = snapshot.persist(dir.path()).unwrap();

        let restored: InterruptedTranscript =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(restored.task_name, "find_town_orgs");
        assert_eq!(restored.system_prompt, "be helpful");
        assert_eq!(restored.turns, transcript.turns().to_vec());
    }
}

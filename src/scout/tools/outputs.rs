use async_trait::async_trait;
use serde_json::{json, Value};

use crate::scout::error::Result;
use crate::scout::toolkit::{terminal_execution, Tool};

pub const ALL_ORGS_SUMMARY: &str = "all_orgs_summary";
pub const COMMITTEE_MEETING_TIMES_SUMMARY: &str = "committee_meeting_times_summary";
pub const FETCHING_STRATEGY_SUMMARY: &str = "fetching_strategy_summary";

/// A terminal tool: its schema shapes the final answer of a task.
#[derive(Debug, Clone)]
pub struct OutputTool {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

impl OutputTool {
    /// Town-wide agendas page plus every board, committee and commission.
    pub fn all_orgs_summary() -> Self {
        Self {
            name: ALL_ORGS_SUMMARY,
            description: "Record a summary of a municipality: the URL where agendas and minutes for all \
                          groups are published (if any), and every board, committee and commission with \
                          its overview page.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "agendas_url": {
                        "type": "string",
                        "description": "URL of the highest level page with agendas and/or minutes for the \
                                        whole municipality. Leave empty if not found."
                    },
                    "committees": {
                        "type": "array",
                        "description": "Every committee, commission and board of the municipality",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string", "description": "The committee name"},
                                "overview_url": {
                                    "type": "string",
                                    "description": "URL of the committee overview page (members, purpose, \
                                                    meeting times). Not specific to agendas."
                                },
                                "agendas_url": {
                                    "type": "string",
                                    "description": "URL of the highest level page with agendas or minutes \
                                                    for this committee only. Leave empty when only a \
                                                    municipality-wide page exists."
                                }
                            },
                            "required": ["name"]
                        }
                    }
                },
                "required": ["committees"]
            }),
        }
    }

    pub fn committee_meeting_times_summary() -> Self {
        Self {
            name: COMMITTEE_MEETING_TIMES_SUMMARY,
            description: "Record when a municipal group meets and where its agendas can be found.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "schedule": {
                        "type": "string",
                        "description": "Short readable schedule, like '1st and 3rd Tuesdays at 7pm' or 'As needed'"
                    },
                    "schedule_cron": {
                        "type": "string",
                        "description": "Cron expression for a regular schedule. Null when meetings are irregular."
                    },
                    "meeting_location": {
                        "type": "string",
                        "description": "Regular meeting place. Null when unknown or irregular."
                    },
                    "agendas": {
                        "type": "object",
                        "properties": {
                            "url": {"type": "string", "description": "Where the agenda documents are listed"},
                            "format": {
                                "type": "string",
                                "enum": ["document-links", "embedded-html", "unknown", "other"],
                                "description": "document-links: links to files. embedded-html: links to pages \
                                                that display the agenda."
                            },
                            "notes": {"type": "string", "description": "Anything else needed to locate agendas"}
                        }
                    }
                }
            }),
        }
    }

    pub fn fetching_strategy_summary() -> Self {
        Self {
            name: FETCHING_STRATEGY_SUMMARY,
            description: "Record the final fetching strategy for a committee. Only submit a strategy \
                          that passed test_proposed_strategy.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "committee_name": {"type": "string", "description": "Name of the committee"},
                    "strategy_name": {
                        "type": "string",
                        "description": "Snake case name of the strategy, e.g. yearly_archive_pdf_links"
                    },
                    "schema": {
                        "type": "object",
                        "description": "Map of field names to how each field is used",
                        "additionalProperties": {"type": "string"}
                    },
                    "values": {
                        "type": "object",
                        "description": "Values of the schema fields for this committee",
                        "additionalProperties": true
                    },
                    "code": {
                        "type": "string",
                        "description": "Python source defining a single get_committee_agendas function \
                                        that takes the schema fields as keyword arguments"
                    },
                    "notes": {"type": "string", "description": "Optional clarifications or edge cases"}
                },
                "required": ["committee_name", "strategy_name", "schema", "values", "code"]
            }),
        }
    }
}

#[async_trait]
impl Tool for OutputTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value) -> Result<Value> {
        Err(terminal_execution(self.name))
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A proposed fetching strategy. `schema` and `code` are meant to be reusable
/// across subjects; `values` are the concrete arguments for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committee_name: Option<String>,
    pub strategy_name: String,
    #[serde(default)]
    pub schema: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Map<String, Value>,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StrategySpec {
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

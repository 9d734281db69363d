// On-disk workflow document format
//
// Field names and nesting follow the JSON documents exactly; the typed graph
// in `definition` is built from these and can be turned back into them.

use serde::{Deserialize, Serialize};

/// A workflow document as stored in `<entity_type>/workflow.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub description: String,
    pub name: String,
    pub transitions: Vec<TransitionDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDocument {
    pub name: String,
    pub automated: bool,
    #[serde(default)]
    pub description: String,
    pub start_state: String,
    #[serde(default)]
    pub start_state_description: String,
    pub end_state: String,
    #[serde(default)]
    pub end_state_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<ProcessesDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessesDocument {
    #[serde(default)]
    pub externalized_processors: Vec<ExternalizedProcessorDocument>,
    #[serde(default)]
    pub schedule_transition_processors: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalizedProcessorDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Entity types this processor may create; drives the dependency graph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adds_new_entities: Vec<String>,
}

impl WorkflowDocument {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

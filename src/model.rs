// Core records shared by the store, the engine and processors

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of the synthetic state an entity holds before its first transition.
pub const NONE_STATE: &str = "None";

/// Unique identifier of an entity record within the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechnicalId(pub Uuid);

impl TechnicalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw).map(Self)
    }
}

impl Default for TechnicalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TechnicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One instance of an entity type with its own state and payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub technical_id: TechnicalId,
    pub entity_type: String,
    pub version: String,
    pub state: String,
    pub payload: serde_json::Value,
}

impl EntityRecord {
    /// A record that has not taken any transition yet
    pub fn new_pending(
        technical_id: TechnicalId,
        entity_type: &str,
        version: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            technical_id,
            entity_type: entity_type.to_string(),
            version: version.to_string(),
            state: NONE_STATE.to_string(),
            payload,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == NONE_STATE
    }
}

/// What caused the engine to look at an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    /// A timer fired for the entity type
    Scheduled,
    /// A dependency entity reached its gating state
    EntityEvent,
    /// Continuation of an automated chain
    Chain,
    /// An operator or caller asked for a named transition
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::Scheduled => "SCHEDULED",
            TriggerKind::EntityEvent => "ENTITY_EVENT",
            TriggerKind::Chain => "CHAIN",
            TriggerKind::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

/// Entity that caused an ENTITY_EVENT trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntity {
    pub entity_type: String,
    pub technical_id: TechnicalId,
}

/// Context visible to criteria under the `$trigger.` prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub kind: TriggerKind,
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_technical_id: Option<TechnicalId>,
}

impl TriggerContext {
    pub fn new(kind: TriggerKind, entity_type: &str) -> Self {
        Self {
            kind,
            entity_type: entity_type.to_string(),
            source_entity_type: None,
            source_technical_id: None,
        }
    }

    pub fn with_source(mut self, source: &SourceEntity) -> Self {
        self.source_entity_type = Some(source.entity_type.clone());
        self.source_technical_id = Some(source.technical_id);
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_record_starts_in_none() {
        let record = EntityRecord::new_pending(TechnicalId::new(), "job", "1000", json!({}));
        assert!(record.is_pending());
        assert_eq!(record.state, "None");
    }

    #[test]
    fn test_trigger_context_serializes_source() {
        let source = SourceEntity {
            entity_type: "job".to_string(),
            technical_id: TechnicalId::new(),
        };
        let ctx = TriggerContext::new(TriggerKind::EntityEvent, "report").with_source(&source);
        let value = ctx.to_value();
        assert_eq!(value["kind"], "ENTITY_EVENT");
        assert_eq!(value["source_entity_type"], "job");
    }
}

// Processor calling context
//
// A context lives for one processor invocation. It borrows the credential
// token and the engine's collaborators, and owns a working copy of the entity
// payload that the engine commits only when the handler succeeds.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::errors::{InferenceError, ProcessorFailure};
use crate::inference::{check_prompt, InferenceClient};
use crate::model::{EntityRecord, TechnicalId, TriggerContext};
use crate::store::EntityStore;

pub struct ProcessorContext<'a> {
    token: &'a str,
    entity_type: &'a str,
    version: &'a str,
    technical_id: TechnicalId,
    transition: &'a str,
    trigger: &'a TriggerContext,
    adds_new_entities: &'a [String],
    store: &'a dyn EntityStore,
    inference: Option<&'a dyn InferenceClient>,
    payload: Value,
    created: Vec<EntityRecord>,
}

/// Identity of the entity a processor runs for
#[derive(Debug, Clone, Copy)]
pub struct EntityScope<'a> {
    pub entity_type: &'a str,
    pub version: &'a str,
    pub technical_id: TechnicalId,
    pub transition: &'a str,
}

impl<'a> ProcessorContext<'a> {
    pub fn new(
        token: &'a str,
        scope: EntityScope<'a>,
        trigger: &'a TriggerContext,
        adds_new_entities: &'a [String],
        store: &'a dyn EntityStore,
        payload: Value,
    ) -> Self {
        Self {
            token,
            entity_type: scope.entity_type,
            version: scope.version,
            technical_id: scope.technical_id,
            transition: scope.transition,
            trigger,
            adds_new_entities,
            store,
            inference: None,
            payload,
            created: Vec::new(),
        }
    }

    pub fn with_inference(mut self, client: &'a dyn InferenceClient) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn token(&self) -> &str {
        self.token
    }

    pub fn entity_type(&self) -> &str {
        self.entity_type
    }

    pub fn version(&self) -> &str {
        self.version
    }

    pub fn technical_id(&self) -> TechnicalId {
        self.technical_id
    }

    pub fn transition(&self) -> &str {
        self.transition
    }

    pub fn trigger(&self) -> &TriggerContext {
        self.trigger
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Value {
        &mut self.payload
    }

    /// Apply a JSON merge patch to the working payload
    pub fn mutate_self(&mut self, patch: Value) {
        merge_patch(&mut self.payload, patch);
    }

    /// Persist a new entity of a type this transition declares in `adds_new_entities`
    pub async fn create_dependent(
        &mut self,
        entity_type: &str,
        payload: Value,
    ) -> Result<TechnicalId, ProcessorFailure> {
        if !self.adds_new_entities.iter().any(|t| t == entity_type) {
            return Err(ProcessorFailure::DependentNotPermitted(entity_type.to_string()));
        }
        let record = self
            .store
            .add_item(self.token, entity_type, self.version, payload)
            .await?;
        info!(
            entity_type = %entity_type,
            technical_id = %record.technical_id,
            parent_type = %self.entity_type,
            parent_id = %self.technical_id,
            "Dependent entity created"
        );
        let id = record.technical_id;
        self.created.push(record);
        Ok(id)
    }

    /// Replace the payload of another entity of the same model version.
    /// The write is not rolled back if this transition later fails.
    pub async fn update_dependent(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
        payload: Value,
    ) -> Result<EntityRecord, ProcessorFailure> {
        if technical_id == self.technical_id {
            return Err(ProcessorFailure::Handler(anyhow::anyhow!(
                "the entity being advanced is changed through mutate_self"
            )));
        }
        Ok(self
            .store
            .update_item(self.token, entity_type, self.version, technical_id, payload)
            .await?)
    }

    pub async fn get_entity(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
    ) -> Result<EntityRecord, ProcessorFailure> {
        Ok(self
            .store
            .get_item(self.token, entity_type, self.version, technical_id)
            .await?)
    }

    /// Ask the configured inference client; the context token is passed along
    pub async fn ask(
        &self,
        channel_id: &str,
        endpoint: &str,
        prompt: &str,
    ) -> Result<String, ProcessorFailure> {
        check_prompt(prompt)?;
        let client = self.inference.ok_or_else(|| {
            InferenceError::Unavailable("no inference client configured".to_string())
        })?;
        debug!(
            entity_type = %self.entity_type,
            technical_id = %self.technical_id,
            endpoint = %endpoint,
            prompt_bytes = prompt.len(),
            "Sending inference request"
        );
        Ok(client.ask(self.token, channel_id, endpoint, prompt).await?)
    }

    pub fn created_dependents(&self) -> &[EntityRecord] {
        &self.created
    }

    /// Working payload and the dependents persisted during the call
    pub(crate) fn into_parts(self) -> (Value, Vec<EntityRecord>) {
        (self.payload, self.created)
    }
}

/// RFC 7396 JSON merge patch: objects merge recursively, `null` removes a key,
/// anything else replaces the target
pub fn merge_patch(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(&key);
            } else {
                merge_patch(map.entry(key).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::model::TriggerKind;
    use crate::store::InMemoryEntityStore;
    use serde_json::json;

    #[test]
    fn test_merge_patch_rules() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"a": [1, 2]});
        merge_patch(&mut target, json!({"a": [3], "b": {"c": 1}}));
        assert_eq!(target, json!({"a": [3], "b": {"c": 1}}));

        let mut target = json!("scalar");
        merge_patch(&mut target, json!({"x": 1}));
        assert_eq!(target, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_create_dependent_is_limited_to_declared_types() {
        let store = InMemoryEntityStore::new();
        let trigger = TriggerContext::new(TriggerKind::Scheduled, "job");
        let allowed = vec!["report".to_string()];
        let scope = EntityScope {
            entity_type: "job",
            version: "1000",
            technical_id: TechnicalId::new(),
            transition: "ingest",
        };
        let mut ctx = ProcessorContext::new("token", scope, &trigger, &allowed, &store, json!({}));

        let id = ctx.create_dependent("report", json!({"n": 1})).await.unwrap();
        assert_eq!(store.get_item("token", "report", "1000", id).await.unwrap().version, "1000");

        let err = ctx.create_dependent("invoice", json!({})).await.unwrap_err();
        assert!(matches!(err, ProcessorFailure::DependentNotPermitted(ref t) if t == "invoice"));
        assert_eq!(ctx.created_dependents().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_read_other_entities() {
        let store = InMemoryEntityStore::new();
        let report = store.add_item("token", "report", "1000", json!({"n": 1})).await.unwrap();
        let trigger = TriggerContext::new(TriggerKind::Chain, "job");
        let scope = EntityScope {
            entity_type: "job",
            version: "1000",
            technical_id: TechnicalId::new(),
            transition: "summarise",
        };
        let ctx = ProcessorContext::new("token", scope, &trigger, &[], &store, json!({}));

        let updated = ctx
            .update_dependent("report", report.technical_id, json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(updated.state, "None");
        assert_eq!(ctx.get_entity("report", report.technical_id).await.unwrap().payload, json!({"n": 2}));

        let err = ctx.get_entity("report", TechnicalId::new()).await.unwrap_err();
        assert!(matches!(err, ProcessorFailure::Store(StoreError::NotFound { .. })));

        let err = ctx
            .update_dependent("job", scope.technical_id, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorFailure::Handler(_)));
    }

    #[tokio::test]
    async fn test_ask_without_client_is_unavailable() {
        let store = InMemoryEntityStore::new();
        let trigger = TriggerContext::new(TriggerKind::Manual, "job");
        let scope = EntityScope {
            entity_type: "job",
            version: "1000",
            technical_id: TechnicalId::new(),
            transition: "summarise",
        };
        let ctx = ProcessorContext::new("token", scope, &trigger, &[], &store, json!({}));
        let err = ctx.ask("chat", "summary", "hello").await.unwrap_err();
        assert!(matches!(
            err,
            ProcessorFailure::Inference(InferenceError::Unavailable(_))
        ));
    }
}

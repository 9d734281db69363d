use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::EntityStore;
use crate::errors::StoreError;
use crate::model::{EntityRecord, TechnicalId};

/// Process-local store keyed by technical id
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    records: RwLock<HashMap<TechnicalId, EntityRecord>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of all types
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Insert or overwrite a record as-is (test fixtures, imports)
    pub async fn insert(&self, record: EntityRecord) {
        self.records.write().await.insert(record.technical_id, record);
    }
}

fn addressed(record: &EntityRecord, entity_type: &str, version: &str) -> bool {
    record.entity_type == entity_type && record.version == version
}

fn not_found(entity_type: &str, technical_id: TechnicalId) -> StoreError {
    StoreError::NotFound {
        entity_type: entity_type.to_string(),
        technical_id,
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_item(
        &self,
        _token: &str,
        entity_type: &str,
        version: &str,
        technical_id: TechnicalId,
    ) -> Result<EntityRecord, StoreError> {
        self.records
            .read()
            .await
            .get(&technical_id)
            .filter(|record| addressed(record, entity_type, version))
            .cloned()
            .ok_or_else(|| not_found(entity_type, technical_id))
    }

    async fn get_items(&self, entity_type: &str) -> Result<Vec<EntityRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn get_items_by_condition(
        &self,
        entity_type: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.entity_type == entity_type)
            .filter(|record| record.payload.get(key) == Some(value))
            .cloned()
            .collect())
    }

    async fn add_item(
        &self,
        _token: &str,
        entity_type: &str,
        version: &str,
        payload: Value,
    ) -> Result<EntityRecord, StoreError> {
        let record = EntityRecord::new_pending(TechnicalId::new(), entity_type, version, payload);
        self.records
            .write()
            .await
            .insert(record.technical_id, record.clone());
        debug!(
            entity_type = %entity_type,
            technical_id = %record.technical_id,
            "Entity record added"
        );
        Ok(record)
    }

    async fn update_item(
        &self,
        _token: &str,
        entity_type: &str,
        version: &str,
        technical_id: TechnicalId,
        payload: Value,
    ) -> Result<EntityRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&technical_id)
            .filter(|record| addressed(record, entity_type, version))
            .ok_or_else(|| not_found(entity_type, technical_id))?;
        record.payload = payload;
        Ok(record.clone())
    }

    async fn update_record(
        &self,
        _token: &str,
        record: &EntityRecord,
        expected_state: &str,
    ) -> Result<EntityRecord, StoreError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&record.technical_id)
            .filter(|stored| addressed(stored, &record.entity_type, &record.version))
            .ok_or_else(|| not_found(&record.entity_type, record.technical_id))?;
        if stored.state != expected_state {
            return Err(StoreError::Conflict {
                entity_type: record.entity_type.clone(),
                technical_id: record.technical_id,
                expected: expected_state.to_string(),
                actual: stored.state.clone(),
            });
        }
        stored.state = record.state.clone();
        stored.payload = record.payload.clone();
        Ok(stored.clone())
    }

    async fn delete_item(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get(&technical_id) {
            Some(record) if record.entity_type == entity_type => {
                records.remove(&technical_id);
                Ok(())
            }
            _ => Err(not_found(entity_type, technical_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str = "token";

    #[tokio::test]
    async fn test_add_item_starts_in_none() {
        let store = InMemoryEntityStore::new();
        let record = store.add_item(TOKEN, "job", "1000", json!({"a": 1})).await.unwrap();
        assert!(record.is_pending());
        assert_eq!(record.version, "1000");

        let fetched = store.get_item(TOKEN, "job", "1000", record.technical_id).await.unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_get_item_checks_entity_type() {
        let store = InMemoryEntityStore::new();
        let record = store.add_item(TOKEN, "job", "1000", json!({})).await.unwrap();
        let err = store.get_item(TOKEN, "report", "1000", record.technical_id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_records_are_addressed_by_version() {
        let store = InMemoryEntityStore::new();
        let record = store.add_item(TOKEN, "job", "1000", json!({})).await.unwrap();

        let err = store.get_item(TOKEN, "job", "2000", record.technical_id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        let err = store
            .update_item(TOKEN, "job", "2000", record.technical_id, json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let fetched = store.get_item(TOKEN, "job", "1000", record.technical_id).await.unwrap();
        assert_eq!(fetched.payload, json!({}));
    }

    #[tokio::test]
    async fn test_update_record_is_compare_and_set() {
        let store = InMemoryEntityStore::new();
        let mut record = store.add_item(TOKEN, "job", "1000", json!({})).await.unwrap();
        record.state = "created".to_string();
        record.payload = json!({"step": 1});

        let stored = store.update_record(TOKEN, &record, "None").await.unwrap();
        assert_eq!(stored.state, "created");

        record.state = "done".to_string();
        let err = store.update_record(TOKEN, &record, "None").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref actual, .. } if actual == "created"));

        let current = store.get_item(TOKEN, "job", "1000", record.technical_id).await.unwrap();
        assert_eq!(current.state, "created");
        assert_eq!(current.payload, json!({"step": 1}));
    }

    #[tokio::test]
    async fn test_update_item_keeps_state() {
        let store = InMemoryEntityStore::new();
        let record = store.add_item(TOKEN, "job", "1000", json!({})).await.unwrap();
        let updated = store
            .update_item(TOKEN, "job", "1000", record.technical_id, json!({"x": true}))
            .await
            .unwrap();
        assert_eq!(updated.state, "None");
        assert_eq!(updated.payload, json!({"x": true}));
    }

    #[tokio::test]
    async fn test_condition_and_delete() {
        let store = InMemoryEntityStore::new();
        let a = store.add_item(TOKEN, "job", "1000", json!({"owner": "ann"})).await.unwrap();
        store.add_item(TOKEN, "job", "1000", json!({"owner": "bob"})).await.unwrap();
        store.add_item(TOKEN, "report", "1000", json!({"owner": "ann"})).await.unwrap();

        let matches = store
            .get_items_by_condition("job", "owner", &json!("ann"))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].technical_id, a.technical_id);

        store.delete_item("job", a.technical_id).await.unwrap();
        assert_eq!(store.get_items("job").await.unwrap().len(), 1);
        assert_eq!(store.len().await, 2);
    }
}

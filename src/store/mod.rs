//! Entity store adapter
//!
//! The engine only talks to persistence through [`EntityStore`]. Records are
//! addressed by entity type, model version and technical id, and every call
//! that reads or writes a single record carries the caller's auth token.
//! [`InMemoryEntityStore`] backs tests and the `simulate` command.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StoreError;
use crate::model::{EntityRecord, TechnicalId};

mod memory;

pub use memory::InMemoryEntityStore;

/// CRUD over entity records
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch one record
    async fn get_item(
        &self,
        token: &str,
        entity_type: &str,
        version: &str,
        technical_id: TechnicalId,
    ) -> Result<EntityRecord, StoreError>;

    /// All records of an entity type
    async fn get_items(&self, entity_type: &str) -> Result<Vec<EntityRecord>, StoreError>;

    /// Records whose payload has `key` equal to `value` at the top level
    async fn get_items_by_condition(
        &self,
        entity_type: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<EntityRecord>, StoreError>;

    /// Create a record in state "None" with a fresh technical id
    async fn add_item(
        &self,
        token: &str,
        entity_type: &str,
        version: &str,
        payload: Value,
    ) -> Result<EntityRecord, StoreError>;

    /// Replace the payload of an existing record, leaving its state alone
    async fn update_item(
        &self,
        token: &str,
        entity_type: &str,
        version: &str,
        technical_id: TechnicalId,
        payload: Value,
    ) -> Result<EntityRecord, StoreError>;

    /// Write state and payload together if the stored state still equals
    /// `expected_state`, otherwise fail with [`StoreError::Conflict`]
    async fn update_record(
        &self,
        token: &str,
        record: &EntityRecord,
        expected_state: &str,
    ) -> Result<EntityRecord, StoreError>;

    async fn delete_item(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
    ) -> Result<(), StoreError>;
}

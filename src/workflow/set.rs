use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use super::definition::WorkflowDefinition;
use super::loader::{Placeholders, WorkflowLoader};
use crate::dependency::DependencyResolver;
use crate::errors::{DefinitionError, DependencyError};

/// Every loaded workflow, keyed by entity type
#[derive(Debug, Clone, Default)]
pub struct WorkflowSet {
    definitions: BTreeMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowSet {
    pub fn new(definitions: Vec<WorkflowDefinition>) -> Result<Self, DefinitionError> {
        let mut set = Self::default();
        for definition in definitions {
            set.insert(definition)?;
        }
        Ok(set)
    }

    /// Load a definitions root through `loader`
    pub fn from_dir(
        loader: &WorkflowLoader<'_>,
        root: &Path,
        placeholders: &Placeholders,
    ) -> Result<Self, DefinitionError> {
        Self::new(loader.load_dir(root, placeholders)?)
    }

    pub fn insert(&mut self, definition: WorkflowDefinition) -> Result<(), DefinitionError> {
        let entity_type = definition.entity_type().to_string();
        if self.definitions.contains_key(&entity_type) {
            return Err(DefinitionError::DuplicateEntityType(entity_type));
        }
        self.definitions.insert(entity_type, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Option<&Arc<WorkflowDefinition>> {
        self.definitions.get(entity_type)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.definitions.contains_key(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Processor names referenced by any transition
    pub fn processor_names(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|d| d.processors().map(|(_, p)| p.name.clone()))
            .collect()
    }

    pub fn resolver(&self) -> Result<DependencyResolver, DependencyError> {
        DependencyResolver::build(self)
    }
}

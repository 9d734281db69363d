use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::EngineConfig;
use crate::registry::ProcessorRegistry;
use crate::workflow::{WorkflowLoader, WorkflowSet};

pub mod config;
pub mod export;
pub mod graph;
pub mod simulate;
pub mod validate;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Where definitions come from and which processor names may stay unregistered
#[derive(Debug, Clone)]
pub struct DefinitionSource {
    pub dir: PathBuf,
    pub unresolved: Vec<String>,
    pub allow_unresolved: bool,
}

impl DefinitionSource {
    /// Command line values win over the configured ones
    pub fn from_config(config: &EngineConfig, dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.unwrap_or_else(|| config.definitions.dir.clone()),
            unresolved: config.definitions.unresolved.clone(),
            allow_unresolved: config.definitions.allow_unresolved,
        }
    }

    pub fn with_unresolved(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.unresolved.extend(names);
        self
    }

    pub fn allow_unresolved(mut self, allow: bool) -> Self {
        self.allow_unresolved |= allow;
        self
    }

    pub fn load(&self, config: &EngineConfig, registry: &ProcessorRegistry) -> Result<WorkflowSet> {
        let loader = WorkflowLoader::new(registry)
            .with_unresolved(self.unresolved.iter().cloned())
            .allow_all_unresolved(self.allow_unresolved);
        WorkflowSet::from_dir(&loader, &self.dir, &config.definitions.placeholders())
            .with_context(|| format!("Failed to load workflows from {}", self.dir.display()))
    }
}

/// Effective configuration for a command
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from(Some(path))
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => crate::config::config().cloned(),
    }
}

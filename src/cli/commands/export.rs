use anyhow::{anyhow, Result};

use crate::cli::commands::{Command, DefinitionSource};
use crate::config::EngineConfig;
use crate::registry::ProcessorRegistry;

/// Prints the normalised JSON document of one entity type to stdout
pub struct ExportCommand {
    config: EngineConfig,
    source: DefinitionSource,
    entity_type: String,
}

impl ExportCommand {
    pub fn new(config: EngineConfig, source: DefinitionSource, entity_type: String) -> Self {
        Self {
            config,
            source: source.allow_unresolved(true),
            entity_type,
        }
    }
}

impl Command for ExportCommand {
    async fn execute(&self) -> Result<()> {
        let registry = ProcessorRegistry::builder().build();
        let workflows = self.source.load(&self.config, &registry)?;
        let definition = workflows.get(&self.entity_type).ok_or_else(|| {
            anyhow!(
                "Unknown entity type '{}' (known: {})",
                self.entity_type,
                workflows.entity_types().collect::<Vec<_>>().join(", ")
            )
        })?;

        println!("{}", definition.to_document().to_json_pretty()?);
        Ok(())
    }
}

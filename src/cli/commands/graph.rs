use anyhow::Result;

use crate::cli::commands::{Command, DefinitionSource};
use crate::config::EngineConfig;
use crate::registry::ProcessorRegistry;

pub struct GraphCommand {
    config: EngineConfig,
    source: DefinitionSource,
}

impl GraphCommand {
    pub fn new(config: EngineConfig, source: DefinitionSource) -> Self {
        Self {
            config,
            source: source.allow_unresolved(true),
        }
    }
}

impl Command for GraphCommand {
    async fn execute(&self) -> Result<()> {
        let registry = ProcessorRegistry::builder().build();
        let workflows = self.source.load(&self.config, &registry)?;
        let resolver = workflows.resolver()?;

        println!("📊 ENTITY TYPES (dependency order):");
        println!("───────────────────────────────────");
        for (position, entity_type) in resolver.topological_order().iter().enumerate() {
            let marker = if resolver.is_scheduled(entity_type) {
                "⏰"
            } else {
                "🔗"
            };
            println!("{:>3}. {marker} {entity_type}", position + 1);
        }
        println!();

        println!("🔗 GATING EDGES:");
        println!("────────────────");
        let mut any = false;
        for edge in resolver.edges() {
            any = true;
            println!(
                "   {} --[{} → {}]--> {}",
                edge.dependency, edge.transition, edge.gating_state, edge.dependent
            );
        }
        if !any {
            println!("   (none - every entity type is scheduled)");
        }
        Ok(())
    }
}

use anyhow::Result;

use crate::cli::commands::{Command, DefinitionSource};
use crate::config::EngineConfig;
use crate::dependency::StartMode;
use crate::registry::ProcessorRegistry;

pub struct ValidateCommand {
    config: EngineConfig,
    source: DefinitionSource,
}

impl ValidateCommand {
    pub fn new(config: EngineConfig, source: DefinitionSource) -> Self {
        Self { config, source }
    }
}

impl Command for ValidateCommand {
    async fn execute(&self) -> Result<()> {
        println!("🔍 Validating workflows in {}", self.source.dir.display());

        // The CLI registers no handlers, so every processor name must be declared unresolved
        let registry = ProcessorRegistry::builder().build();
        let workflows = match self.source.load(&self.config, &registry) {
            Ok(workflows) => workflows,
            Err(e) => {
                println!("❌ {e:#}");
                return Err(e);
            }
        };

        if workflows.is_empty() {
            println!("⚠️  No workflow definitions found");
        }

        let resolver = match workflows.resolver() {
            Ok(resolver) => resolver,
            Err(e) => {
                println!("❌ Dependency graph invalid: {e}");
                return Err(e.into());
            }
        };

        for entity_type in resolver.topological_order() {
            let Some(definition) = workflows.get(entity_type) else {
                continue;
            };
            let start = match resolver.start_mode(entity_type) {
                StartMode::Scheduled => "scheduled".to_string(),
                StartMode::EntityEvent => resolver
                    .depends_on(entity_type)
                    .map(|edge| format!("after {} reaches {}", edge.dependency, edge.gating_state))
                    .unwrap_or_default(),
            };
            println!(
                "✅ {entity_type}: {} states, {} transitions ({start})",
                definition.states().len(),
                definition.transitions().len()
            );
        }

        let processors = workflows.processor_names();
        if !processors.is_empty() {
            println!(
                "🔧 Processors referenced: {}",
                processors.into_iter().collect::<Vec<_>>().join(", ")
            );
        }
        println!("✅ {} workflow(s) valid", workflows.len());
        Ok(())
    }
}

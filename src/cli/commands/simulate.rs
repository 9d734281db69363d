use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::warn;

use crate::cli::commands::{Command, DefinitionSource};
use crate::config::EngineConfig;
use crate::dispatcher::{schedule_for, Dispatcher, Scheduler, Trigger, WorkerPool};
use crate::engine::Engine;
use crate::inference::CannedInferenceClient;
use crate::observability::engine_metrics;
use crate::registry::{NoopProcessor, ProcessorRegistry};
use crate::shutdown::ShutdownCoordinator;
use crate::store::{EntityStore, InMemoryEntityStore};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct SimulateCommand {
    config: EngineConfig,
    source: DefinitionSource,
    run_for: Duration,
}

impl SimulateCommand {
    pub fn new(config: EngineConfig, source: DefinitionSource, seconds: u64) -> Self {
        Self {
            config,
            source: source.allow_unresolved(true),
            run_for: Duration::from_secs(seconds),
        }
    }

    fn build_registry(names: impl IntoIterator<Item = String>) -> Result<ProcessorRegistry> {
        let mut builder = ProcessorRegistry::builder();
        for name in names {
            builder.register(name, NoopProcessor)?;
        }
        Ok(builder.build())
    }
}

impl Command for SimulateCommand {
    async fn execute(&self) -> Result<()> {
        println!("🔄 Loading workflows from {}... ", self.source.dir.display());
        let discovery = ProcessorRegistry::builder().build();
        let workflows = self.source.load(&self.config, &discovery)?;
        let registry = Self::build_registry(workflows.processor_names())?;
        let resolver = Arc::new(workflows.resolver()?);
        println!(
            "✅ {} entity type(s), {} no-op processor(s)",
            workflows.len(),
            registry.len()
        );

        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let runtime = &self.config.engine;
        let mut engine = Engine::new(Arc::new(workflows), Arc::new(registry), Arc::clone(&store))
            .with_processor_timeout(runtime.processor_timeout())
            .with_entity_version(self.config.definitions.entity_version.clone());
        if let Some(token) = &runtime.token {
            engine = engine.with_token(token.clone());
        }
        if self.config.inference.mock {
            engine = engine.with_inference(Arc::new(CannedInferenceClient::new(
                self.config.inference.canned_answer.clone(),
            )));
        } else {
            warn!("No inference backend configured; processors asking for inference will fail");
        }

        let dispatcher = Arc::new(
            Dispatcher::new(Arc::new(engine), Arc::clone(&resolver))
                .with_max_chain_ticks(runtime.max_chain_ticks),
        );
        let pool = WorkerPool::start(dispatcher, runtime.worker_count, runtime.queue_capacity);
        let submitter = pool.submitter();

        let schedule = schedule_for(&resolver, &self.config.scheduler);
        // Kick every scheduled type once so short runs still see traffic
        for (entity_type, _) in &schedule {
            submitter
                .submit(Trigger::Scheduled {
                    entity_type: entity_type.clone(),
                })
                .await?;
        }

        let coordinator = ShutdownCoordinator::new();
        let scheduler = Scheduler::spawn(submitter, schedule, coordinator.signal());
        println!(
            "🚀 Running {} timer(s) for {}s (Ctrl-C to stop early)",
            scheduler.len(),
            self.run_for.as_secs()
        );

        tokio::select! {
            _ = sleep(self.run_for) => {}
            result = coordinator.wait_for_ctrl_c() => result?,
        }
        coordinator.trigger();
        scheduler.join().await;
        pool.shutdown(SHUTDOWN_GRACE).await?;

        println!();
        println!("📋 ENTITIES BY STATE:");
        println!("─────────────────────");
        for entity_type in resolver.topological_order() {
            let records = store.get_items(entity_type).await?;
            let mut by_state: BTreeMap<&str, usize> = BTreeMap::new();
            for record in &records {
                *by_state.entry(record.state.as_str()).or_default() += 1;
            }
            println!("📦 {entity_type}: {} record(s)", records.len());
            for (state, count) in by_state {
                println!("   • {state}: {count}");
            }
        }

        println!();
        println!("📊 ENGINE METRICS:");
        println!("{}", serde_json::to_string_pretty(&engine_metrics().get_stats())?);
        Ok(())
    }
}

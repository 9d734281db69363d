// Entity Flow Library - declarative entity workflow engine
// This exposes the core components for embedding and integration tests

pub mod cli;
pub mod config;
pub mod dependency;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod inference;
pub mod model;
pub mod observability;
pub mod registry;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::{config, EngineConfig};
pub use dependency::{DependencyEdge, DependencyResolver, StartMode};
pub use dispatcher::{
    DispatchEvent, DispatchEventKind, DispatchReport, Dispatcher, RunPhase, Scheduler, Trigger,
    TriggerSubmitter, WorkerPool,
};
pub use engine::{AdvanceOutcome, Engine};
pub use errors::{
    CriteriaError, DefinitionError, DependencyError, EngineError, InferenceError,
    ProcessorError, ProcessorFailure, StateMismatchError, StoreError,
};
pub use inference::{CannedInferenceClient, InferenceClient};
pub use model::{EntityRecord, SourceEntity, TechnicalId, TriggerContext, TriggerKind, NONE_STATE};
pub use observability::{engine_metrics, EngineMetrics, EngineStats, OperationTimer};
pub use registry::{NoopProcessor, Processor, ProcessorContext, ProcessorRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use store::{EntityStore, InMemoryEntityStore};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use workflow::{Placeholders, WorkflowDefinition, WorkflowLoader, WorkflowSet};

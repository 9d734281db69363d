//! Transition engine
//!
//! Selects and applies one transition for one entity, runs its processor and
//! commits the result. Every call holds the entity's lock from the re-read of
//! the record until the commit, so transitions of one entity are strictly
//! sequential while different entities proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn, Instrument};

use crate::errors::{
    CriteriaError, EngineError, ProcessorError, ProcessorFailure, StateMismatchError, StoreError,
};
use crate::inference::InferenceClient;
use crate::model::{EntityRecord, TechnicalId, TriggerContext};
use crate::observability::{engine_metrics, OperationTimer};
use crate::registry::{EntityScope, ProcessorContext, ProcessorRegistry};
use crate::store::EntityStore;
use crate::telemetry::{create_transition_span, generate_correlation_id};
use crate::workflow::{ProcessorRef, Transition, WorkflowDefinition, WorkflowSet};

mod locks;
pub mod selection;

pub use locks::{EntityGuard, EntityLocks};
pub use selection::{criteria_hold, select, Selection, SelectionError};

pub const DEFAULT_PROCESSOR_TIMEOUT: Duration = Duration::from_secs(30);
/// Model version of records the engine reads and creates
pub const DEFAULT_ENTITY_VERSION: &str = "1000";

/// What a single `advance` or `apply` call did
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    Transitioned {
        transition: String,
        from: String,
        to: String,
        record: EntityRecord,
        /// Dependents the processor persisted during the transition
        created_dependents: Vec<EntityRecord>,
    },
    /// Nothing qualified; the record is unchanged
    Quiescent { record: EntityRecord },
}

impl AdvanceOutcome {
    pub fn record(&self) -> &EntityRecord {
        match self {
            AdvanceOutcome::Transitioned { record, .. } | AdvanceOutcome::Quiescent { record } => {
                record
            }
        }
    }

    pub fn is_transitioned(&self) -> bool {
        matches!(self, AdvanceOutcome::Transitioned { .. })
    }
}

pub struct Engine {
    workflows: Arc<WorkflowSet>,
    registry: Arc<ProcessorRegistry>,
    store: Arc<dyn EntityStore>,
    inference: Option<Arc<dyn InferenceClient>>,
    locks: EntityLocks,
    processor_timeout: Duration,
    token: String,
    entity_version: String,
}

impl Engine {
    pub fn new(
        workflows: Arc<WorkflowSet>,
        registry: Arc<ProcessorRegistry>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            workflows,
            registry,
            store,
            inference: None,
            locks: EntityLocks::new(),
            processor_timeout: DEFAULT_PROCESSOR_TIMEOUT,
            token: String::new(),
            entity_version: DEFAULT_ENTITY_VERSION.to_string(),
        }
    }

    pub fn with_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn with_processor_timeout(mut self, timeout: Duration) -> Self {
        self.processor_timeout = timeout;
        self
    }

    /// Credential handed to processors and the store for the duration of each call
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_entity_version(mut self, version: impl Into<String>) -> Self {
        self.entity_version = version.into();
        self
    }

    pub fn entity_version(&self) -> &str {
        &self.entity_version
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub fn workflows(&self) -> &Arc<WorkflowSet> {
        &self.workflows
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    fn definition(&self, entity_type: &str) -> Result<&Arc<WorkflowDefinition>, EngineError> {
        self.workflows
            .get(entity_type)
            .ok_or_else(|| EngineError::UnknownEntityType(entity_type.to_string()))
    }

    /// Fire the automated transition that qualifies from the entity's current state
    pub async fn advance(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
        trigger: &TriggerContext,
    ) -> Result<AdvanceOutcome, EngineError> {
        let definition = self.definition(entity_type)?;
        let _guard = self.locks.lock(technical_id).await;
        let record = self
            .store
            .get_item(&self.token, entity_type, &self.entity_version, technical_id)
            .await?;

        let Some(state) = definition.state_id(&record.state) else {
            warn!(
                entity_type = %entity_type,
                technical_id = %technical_id,
                state = %record.state,
                "Entity is in a state its workflow does not declare"
            );
            return Err(EngineError::UndeclaredState {
                entity_type: entity_type.to_string(),
                technical_id,
                state: record.state,
            });
        };

        let trigger_value = trigger.to_value();
        let candidates = definition.transitions_from(state).filter(|t| t.automated);
        let selection = match select(candidates, &record.payload, &trigger_value) {
            Ok(selection) => selection,
            Err(SelectionError { transition, error }) => {
                return Err(criteria_failure(&record, transition, error))
            }
        };

        let Some(transition) = selection.chosen() else {
            debug!(
                entity_type = %entity_type,
                technical_id = %technical_id,
                state = %record.state,
                "No automated transition qualifies"
            );
            engine_metrics().record_quiescent();
            return Ok(AdvanceOutcome::Quiescent { record });
        };

        if selection.is_ambiguous() {
            engine_metrics().record_ambiguity();
            let passed_over: Vec<&str> = selection
                .passed_over()
                .iter()
                .map(|t| t.name.as_str())
                .collect();
            warn!(
                entity_type = %entity_type,
                technical_id = %technical_id,
                state = %record.state,
                chosen = %transition.name,
                passed_over = ?passed_over,
                "Several automated transitions qualify; taking the first declared"
            );
        }

        self.fire(definition, record, transition, trigger).await
    }

    /// Fire a named transition, manual or automated
    pub async fn apply(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
        transition_name: &str,
        trigger: &TriggerContext,
    ) -> Result<AdvanceOutcome, EngineError> {
        let definition = self.definition(entity_type)?;
        let transition =
            definition
                .transition(transition_name)
                .ok_or_else(|| EngineError::UnknownTransition {
                    entity_type: entity_type.to_string(),
                    transition: transition_name.to_string(),
                })?;

        let _guard = self.locks.lock(technical_id).await;
        let record = self
            .store
            .get_item(&self.token, entity_type, &self.entity_version, technical_id)
            .await?;

        let expected = definition.state_name(transition.start);
        if expected != record.state {
            return Err(StateMismatchError {
                entity_type: entity_type.to_string(),
                technical_id,
                transition: transition_name.to_string(),
                expected: expected.to_string(),
                actual: record.state,
            }
            .into());
        }

        let holds = criteria_hold(transition, &record.payload, &trigger.to_value())
            .map_err(|error| criteria_failure(&record, transition, error))?;
        if !holds {
            debug!(
                entity_type = %entity_type,
                technical_id = %technical_id,
                transition = %transition_name,
                "Criteria not met; transition not applied"
            );
            engine_metrics().record_quiescent();
            return Ok(AdvanceOutcome::Quiescent { record });
        }

        self.fire(definition, record, transition, trigger).await
    }

    async fn fire(
        &self,
        definition: &WorkflowDefinition,
        record: EntityRecord,
        transition: &Transition,
        trigger: &TriggerContext,
    ) -> Result<AdvanceOutcome, EngineError> {
        let correlation_id = generate_correlation_id();
        let span = create_transition_span(
            &record.entity_type,
            record.technical_id,
            &transition.name,
            &correlation_id,
        );
        self.commit_transition(definition, record, transition, trigger)
            .instrument(span)
            .await
    }

    async fn commit_transition(
        &self,
        definition: &WorkflowDefinition,
        record: EntityRecord,
        transition: &Transition,
        trigger: &TriggerContext,
    ) -> Result<AdvanceOutcome, EngineError> {
        let (payload, created_dependents) = match &transition.processor {
            Some(processor) => {
                self.run_processor(&record, transition, processor, trigger)
                    .await?
            }
            None => (record.payload.clone(), Vec::new()),
        };

        let from = record.state.clone();
        let to = definition.state_name(transition.end).to_string();
        let next = EntityRecord {
            state: to.clone(),
            payload,
            ..record
        };

        let committed = match self.store.update_record(&self.token, &next, &from).await {
            Ok(committed) => committed,
            Err(error) => {
                if matches!(error, StoreError::Conflict { .. }) {
                    engine_metrics().record_conflict();
                }
                return Err(error.into());
            }
        };

        engine_metrics().record_transition();
        info!(
            from = %from,
            to = %to,
            created_dependents = created_dependents.len(),
            "Transition applied"
        );

        Ok(AdvanceOutcome::Transitioned {
            transition: transition.name.clone(),
            from,
            to,
            record: committed,
            created_dependents,
        })
    }

    async fn run_processor(
        &self,
        record: &EntityRecord,
        transition: &Transition,
        processor: &ProcessorRef,
        trigger: &TriggerContext,
    ) -> Result<(serde_json::Value, Vec<EntityRecord>), EngineError> {
        let scope = EntityScope {
            entity_type: &record.entity_type,
            version: &record.version,
            technical_id: record.technical_id,
            transition: &transition.name,
        };
        let mut ctx = ProcessorContext::new(
            &self.token,
            scope,
            trigger,
            &processor.adds_new_entities,
            &*self.store,
            record.payload.clone(),
        );
        if let Some(client) = &self.inference {
            ctx = ctx.with_inference(&**client);
        }

        debug!(processor = %processor.name, "Invoking processor");
        let timer = OperationTimer::new("processor", &processor.name);
        let result = self
            .registry
            .invoke(&processor.name, &mut ctx, self.processor_timeout)
            .await;
        engine_metrics().record_processor_time(timer.finish());
        let (payload, created) = ctx.into_parts();

        match result {
            Ok(()) => Ok((payload, created)),
            Err(failure) => {
                engine_metrics()
                    .record_processor_failure(matches!(failure, ProcessorFailure::Timeout(_)));
                warn!(
                    processor = %processor.name,
                    error = %failure,
                    persisted_dependents = created.len(),
                    "Processor failed; entity stays at its start state"
                );
                Err(ProcessorError {
                    transition: transition.name.clone(),
                    entity_type: record.entity_type.clone(),
                    technical_id: record.technical_id,
                    failure,
                }
                .into())
            }
        }
    }
}

fn criteria_failure(
    record: &EntityRecord,
    transition: &Transition,
    error: CriteriaError,
) -> EngineError {
    engine_metrics().record_processor_failure(false);
    warn!(
        entity_type = %record.entity_type,
        technical_id = %record.technical_id,
        transition = %transition.name,
        error = %error,
        "Criteria could not be evaluated"
    );
    ProcessorError {
        transition: transition.name.clone(),
        entity_type: record.entity_type.clone(),
        technical_id: record.technical_id,
        failure: ProcessorFailure::Criteria(error),
    }
    .into()
}

//! Trigger dispatcher
//!
//! Turns triggers into engine calls and decides what happens next: chain
//! continuation after every successful transition, and dependent entity types
//! once their dependency reaches its gating state. [`Dispatcher::dispatch`] runs
//! one tick; [`WorkerPool`] and [`Scheduler`] run ticks concurrently.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Instrument};

use crate::dependency::DependencyResolver;
use crate::engine::{AdvanceOutcome, Engine};
use crate::errors::EngineError;
use crate::model::{EntityRecord, SourceEntity, TechnicalId, TriggerContext, TriggerKind};
use crate::observability::engine_metrics;
use crate::telemetry::create_dispatch_span;

mod lifecycle;
mod pool;
mod scheduler;

pub use lifecycle::{DispatcherLifecycle, LifecycleEvent, RunPhase};
pub use pool::{TriggerSubmitter, WorkerPool};
pub use scheduler::{schedule_for, Scheduler};

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Upper bound on ticks drained from one trigger before giving up
pub const DEFAULT_MAX_CHAIN_TICKS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    /// Timer fired: create a record and advance it
    Scheduled { entity_type: String },
    /// A dependency reached its gating state. `technical_id` names a record the
    /// gating processor already created; without it a new record is created.
    EntityEvent {
        entity_type: String,
        technical_id: Option<TechnicalId>,
        source: SourceEntity,
    },
    /// Continue an automated chain
    Advance {
        entity_type: String,
        technical_id: TechnicalId,
    },
}

impl Trigger {
    pub fn entity_type(&self) -> &str {
        match self {
            Trigger::Scheduled { entity_type }
            | Trigger::EntityEvent { entity_type, .. }
            | Trigger::Advance { entity_type, .. } => entity_type,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Scheduled { .. } => "SCHEDULED",
            Trigger::EntityEvent { .. } => "ENTITY_EVENT",
            Trigger::Advance { .. } => "ADVANCE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DispatchEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEventKind {
    Instantiated {
        entity_type: String,
        technical_id: TechnicalId,
        trigger: TriggerKind,
    },
    Transitioned {
        entity_type: String,
        technical_id: TechnicalId,
        transition: String,
        from: String,
        to: String,
    },
    Quiescent {
        entity_type: String,
        technical_id: TechnicalId,
        state: String,
    },
    NotReady {
        entity_type: String,
        source: SourceEntity,
    },
    Failed {
        entity_type: String,
        trigger: String,
        error: String,
    },
}

/// Summary of draining one trigger and its follow-ups
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub ticks: usize,
    pub transitions: usize,
    pub failures: Vec<EngineError>,
    /// The tick limit was hit with follow-ups still queued
    pub truncated: bool,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.truncated
    }
}

#[derive(Debug, Default)]
struct Tick {
    outcome: Option<AdvanceOutcome>,
    follow_ups: Vec<Trigger>,
}

pub struct Dispatcher {
    engine: Arc<Engine>,
    resolver: Arc<DependencyResolver>,
    max_chain_ticks: usize,
    events: broadcast::Sender<DispatchEvent>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, resolver: Arc<DependencyResolver>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            engine,
            resolver,
            max_chain_ticks: DEFAULT_MAX_CHAIN_TICKS,
            events,
        }
    }

    pub fn with_max_chain_ticks(mut self, ticks: usize) -> Self {
        self.max_chain_ticks = ticks.max(1);
        self
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    fn publish(&self, kind: DispatchEventKind) {
        // No subscribers is fine
        let _ = self.events.send(DispatchEvent {
            at: Utc::now(),
            kind,
        });
    }

    /// Process one trigger and return the triggers it gives rise to
    pub async fn dispatch(&self, trigger: &Trigger) -> Result<Vec<Trigger>, EngineError> {
        self.tick(trigger).await.map(|tick| tick.follow_ups)
    }

    /// Dispatch `trigger` and every follow-up inline until nothing is left
    pub async fn run_until_quiescent(&self, trigger: Trigger) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut queue = VecDeque::from([trigger]);

        while let Some(next) = queue.pop_front() {
            if report.ticks >= self.max_chain_ticks {
                warn!(
                    ticks = report.ticks,
                    pending = queue.len() + 1,
                    "Chain tick limit reached; remaining follow-ups dropped"
                );
                report.truncated = true;
                break;
            }
            report.ticks += 1;
            match self.tick(&next).await {
                Ok(tick) => {
                    if tick.outcome.as_ref().is_some_and(AdvanceOutcome::is_transitioned) {
                        report.transitions += 1;
                    }
                    queue.extend(tick.follow_ups);
                }
                Err(error) => report.failures.push(error),
            }
        }
        report
    }

    async fn tick(&self, trigger: &Trigger) -> Result<Tick, EngineError> {
        let span = create_dispatch_span(trigger.label(), trigger.entity_type());
        let result = self.dispatch_inner(trigger).instrument(span).await;
        if let Err(error) = &result {
            warn!(
                trigger = trigger.label(),
                entity_type = %trigger.entity_type(),
                error = %error,
                "Dispatch failed"
            );
            self.publish(DispatchEventKind::Failed {
                entity_type: trigger.entity_type().to_string(),
                trigger: trigger.label().to_string(),
                error: error.to_string(),
            });
        }
        result
    }

    async fn dispatch_inner(&self, trigger: &Trigger) -> Result<Tick, EngineError> {
        let entity_type = trigger.entity_type();
        if !self.engine.workflows().contains(entity_type) {
            return Err(EngineError::UnknownEntityType(entity_type.to_string()));
        }

        match trigger {
            Trigger::Scheduled { entity_type } => {
                if !self.resolver.is_scheduled(entity_type) {
                    warn!(
                        entity_type = %entity_type,
                        "Scheduled trigger ignored for a type started by its dependency"
                    );
                    return Ok(Tick::default());
                }
                let record = self.instantiate(entity_type, TriggerKind::Scheduled).await?;
                let ctx = TriggerContext::new(TriggerKind::Scheduled, entity_type);
                self.advance(entity_type, record.technical_id, &ctx).await
            }
            Trigger::EntityEvent {
                entity_type,
                technical_id,
                source,
            } => {
                let technical_id = match technical_id {
                    Some(id) => *id,
                    None => {
                        let dependency = self
                            .engine
                            .store()
                            .get_item(
                                self.engine.token(),
                                &source.entity_type,
                                self.engine.entity_version(),
                                source.technical_id,
                            )
                            .await?;
                        if !self.resolver.ready(entity_type, Some(&dependency)) {
                            debug!(
                                entity_type = %entity_type,
                                source_type = %source.entity_type,
                                source_id = %source.technical_id,
                                source_state = %dependency.state,
                                "Dependency has not reached its gating state"
                            );
                            self.publish(DispatchEventKind::NotReady {
                                entity_type: entity_type.clone(),
                                source: source.clone(),
                            });
                            return Ok(Tick::default());
                        }
                        self.instantiate(entity_type, TriggerKind::EntityEvent)
                            .await?
                            .technical_id
                    }
                };
                let ctx =
                    TriggerContext::new(TriggerKind::EntityEvent, entity_type).with_source(source);
                self.advance(entity_type, technical_id, &ctx).await
            }
            Trigger::Advance {
                entity_type,
                technical_id,
            } => {
                let ctx = TriggerContext::new(TriggerKind::Chain, entity_type);
                self.advance(entity_type, *technical_id, &ctx).await
            }
        }
    }

    async fn instantiate(
        &self,
        entity_type: &str,
        kind: TriggerKind,
    ) -> Result<EntityRecord, EngineError> {
        let record = self
            .engine
            .store()
            .add_item(
                self.engine.token(),
                entity_type,
                self.engine.entity_version(),
                json!({}),
            )
            .await?;
        engine_metrics().record_instantiation();
        info!(
            entity_type = %entity_type,
            technical_id = %record.technical_id,
            trigger = %kind,
            "Entity instantiated"
        );
        self.publish(DispatchEventKind::Instantiated {
            entity_type: entity_type.to_string(),
            technical_id: record.technical_id,
            trigger: kind,
        });
        Ok(record)
    }

    async fn advance(
        &self,
        entity_type: &str,
        technical_id: TechnicalId,
        ctx: &TriggerContext,
    ) -> Result<Tick, EngineError> {
        let outcome = self.engine.advance(entity_type, technical_id, ctx).await?;
        let follow_ups = self.follow_ups(&outcome);
        Ok(Tick {
            outcome: Some(outcome),
            follow_ups,
        })
    }

    /// Triggers implied by a committed outcome
    pub fn follow_ups(&self, outcome: &AdvanceOutcome) -> Vec<Trigger> {
        let (transition, from, to, record, created_dependents) = match outcome {
            AdvanceOutcome::Quiescent { record } => {
                self.publish(DispatchEventKind::Quiescent {
                    entity_type: record.entity_type.clone(),
                    technical_id: record.technical_id,
                    state: record.state.clone(),
                });
                return Vec::new();
            }
            AdvanceOutcome::Transitioned {
                transition,
                from,
                to,
                record,
                created_dependents,
            } => (transition, from, to, record, created_dependents),
        };

        self.publish(DispatchEventKind::Transitioned {
            entity_type: record.entity_type.clone(),
            technical_id: record.technical_id,
            transition: transition.clone(),
            from: from.clone(),
            to: to.clone(),
        });

        // Dependents go first so their readiness check sees the gating state
        // before the chain moves the dependency on
        let mut next = Vec::new();
        let source = SourceEntity {
            entity_type: record.entity_type.clone(),
            technical_id: record.technical_id,
        };
        for edge in self.resolver.dependents_gated_by(&record.entity_type, to) {
            let created: Vec<TechnicalId> = created_dependents
                .iter()
                .filter(|dependent| dependent.entity_type == edge.dependent)
                .map(|dependent| dependent.technical_id)
                .collect();
            if created.is_empty() {
                next.push(Trigger::EntityEvent {
                    entity_type: edge.dependent.clone(),
                    technical_id: None,
                    source: source.clone(),
                });
            } else {
                next.extend(created.into_iter().map(|id| Trigger::EntityEvent {
                    entity_type: edge.dependent.clone(),
                    technical_id: Some(id),
                    source: source.clone(),
                }));
            }
        }

        let continues = self
            .engine
            .workflows()
            .get(&record.entity_type)
            .and_then(|definition| {
                definition
                    .state_id(to)
                    .map(|state| !definition.is_terminal(state))
            })
            .unwrap_or(false);
        if continues {
            next.push(Trigger::Advance {
                entity_type: record.entity_type.clone(),
                technical_id: record.technical_id,
            });
        }
        next
    }
}

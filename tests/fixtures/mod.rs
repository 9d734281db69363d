//! Shared builders for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use entity_flow::dispatcher::Dispatcher;
use entity_flow::engine::Engine;
use entity_flow::registry::ProcessorRegistry;
use entity_flow::store::InMemoryEntityStore;
use entity_flow::workflow::{WorkflowLoader, WorkflowSet};

pub const TOKEN: &str = "test-token";
pub const VERSION: &str = "1000";

pub fn transition(name: &str, start: &str, end: &str) -> Value {
    json!({
        "name": name,
        "automated": true,
        "description": "",
        "start_state": start,
        "start_state_description": "",
        "end_state": end,
        "end_state_description": "",
    })
}

pub fn with_processor(mut transition: Value, processor: &str, adds: &[&str]) -> Value {
    transition["processes"] = json!({
        "externalized_processors": [
            {"name": processor, "description": "", "adds_new_entities": adds}
        ],
        "schedule_transition_processors": []
    });
    transition
}

pub fn manual(mut transition: Value) -> Value {
    transition["automated"] = json!(false);
    transition
}

pub fn workflow(transitions: Vec<Value>) -> String {
    json!({"name": "workflow", "description": "", "transitions": transitions}).to_string()
}

pub fn workflow_set(registry: &ProcessorRegistry, workflows: &[(&str, String)]) -> WorkflowSet {
    let loader = WorkflowLoader::new(registry);
    let definitions = workflows
        .iter()
        .map(|(entity_type, raw)| loader.load(entity_type, raw).unwrap())
        .collect();
    WorkflowSet::new(definitions).unwrap()
}

pub struct Harness {
    pub store: Arc<InMemoryEntityStore>,
    pub engine: Arc<Engine>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn harness(registry: ProcessorRegistry, workflows: &[(&str, String)]) -> Harness {
    harness_with(registry, workflows, |engine| engine)
}

pub fn harness_with(
    registry: ProcessorRegistry,
    workflows: &[(&str, String)],
    configure: impl FnOnce(Engine) -> Engine,
) -> Harness {
    let set = workflow_set(&registry, workflows);
    let resolver = Arc::new(set.resolver().unwrap());
    let store = Arc::new(InMemoryEntityStore::new());
    let engine = Arc::new(configure(
        Engine::new(Arc::new(set), Arc::new(registry), store.clone()).with_token(TOKEN),
    ));
    let dispatcher = Arc::new(Dispatcher::new(engine.clone(), resolver));
    Harness {
        store,
        engine,
        dispatcher,
    }
}

/// Registry with one handler that only counts its invocations
pub fn counting_registry(name: &str) -> (ProcessorRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut builder = ProcessorRegistry::builder();
    builder
        .register_fn(name, move |_ctx| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .unwrap();
    (builder.build(), calls)
}

// Dependency resolver
//
// Entity types form a DAG: a type named in a processor's `adds_new_entities`
// depends on the type owning that transition and is gated on the transition's
// end state. Types with no dependency are driven by the scheduler.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::debug;

use crate::errors::DependencyError;
use crate::model::EntityRecord;
use crate::workflow::WorkflowSet;

/// `dependent` may be instantiated once a `dependency` record reaches `gating_state`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub dependency: String,
    pub dependent: String,
    pub gating_state: String,
    /// Transition whose processor declared the dependent
    pub transition: String,
}

impl DependencyEdge {
    fn describe(&self) -> String {
        format!("'{}' via '{}'", self.dependency, self.transition)
    }
}

/// How an entity type is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartMode {
    Scheduled,
    EntityEvent,
}

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    edges: HashMap<String, DependencyEdge>,
    order: Vec<String>,
}

impl DependencyResolver {
    pub fn build(workflows: &WorkflowSet) -> Result<Self, DependencyError> {
        let mut edges: HashMap<String, DependencyEdge> = HashMap::new();

        for definition in workflows.iter() {
            let owner = definition.entity_type();
            for (transition, processor) in definition.processors() {
                for dependent in &processor.adds_new_entities {
                    if dependent == owner {
                        return Err(DependencyError::SelfDependency(owner.to_string()));
                    }
                    if !workflows.contains(dependent) {
                        return Err(DependencyError::UnresolvedEntityType {
                            dependent: dependent.clone(),
                            declared_by: owner.to_string(),
                        });
                    }
                    let edge = DependencyEdge {
                        dependency: owner.to_string(),
                        dependent: dependent.clone(),
                        gating_state: definition.state_name(transition.end).to_string(),
                        transition: transition.name.clone(),
                    };
                    if let Some(existing) = edges.get(dependent) {
                        return Err(DependencyError::MultipleDependencies {
                            dependent: dependent.clone(),
                            first: existing.describe(),
                            second: edge.describe(),
                        });
                    }
                    edges.insert(dependent.clone(), edge);
                }
            }
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let nodes: HashMap<&str, NodeIndex> = workflows
            .entity_types()
            .map(|entity_type| (entity_type, graph.add_node(entity_type)))
            .collect();
        for edge in edges.values() {
            graph.add_edge(
                nodes[edge.dependency.as_str()],
                nodes[edge.dependent.as_str()],
                (),
            );
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| DependencyError::Cycle(graph[cycle.node_id()].to_string()))?
            .into_iter()
            .map(|index| graph[index].to_string())
            .collect::<Vec<_>>();

        debug!(
            entity_types = order.len(),
            dependencies = edges.len(),
            "Dependency graph resolved"
        );
        Ok(Self { edges, order })
    }

    /// The edge gating `entity_type`, if it has one
    pub fn depends_on(&self, entity_type: &str) -> Option<&DependencyEdge> {
        self.edges.get(entity_type)
    }

    pub fn start_mode(&self, entity_type: &str) -> StartMode {
        if self.edges.contains_key(entity_type) {
            StartMode::EntityEvent
        } else {
            StartMode::Scheduled
        }
    }

    pub fn is_scheduled(&self, entity_type: &str) -> bool {
        self.start_mode(entity_type) == StartMode::Scheduled
    }

    pub fn scheduled_types(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .map(String::as_str)
            .filter(|t| self.is_scheduled(t))
    }

    /// Whether `entity_type` may be instantiated given the record of its dependency
    pub fn ready(&self, entity_type: &str, dependency: Option<&EntityRecord>) -> bool {
        match self.edges.get(entity_type) {
            None => true,
            Some(edge) => dependency.is_some_and(|record| {
                record.entity_type == edge.dependency && record.state == edge.gating_state
            }),
        }
    }

    /// Dependency-first ordering of every entity type
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Edges opened when an `entity_type` record enters `state`
    pub fn dependents_gated_by<'a>(
        &'a self,
        entity_type: &'a str,
        state: &'a str,
    ) -> impl Iterator<Item = &'a DependencyEdge> + 'a {
        self.order
            .iter()
            .filter_map(|t| self.edges.get(t))
            .filter(move |edge| edge.dependency == entity_type && edge.gating_state == state)
    }

    pub fn edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.order.iter().filter_map(|t| self.edges.get(t))
    }
}

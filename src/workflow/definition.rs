// Typed workflow graph built once from a workflow document

use std::collections::HashMap;

use super::criteria::Predicate;
use super::document::{
    ExternalizedProcessorDocument, ProcessesDocument, TransitionDocument, WorkflowDocument,
};
use crate::model::NONE_STATE;

/// Index of a state inside one entity type's state table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u32);

impl StateId {
    /// The synthetic "not yet created" state
    pub const NONE: StateId = StateId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned state names for one entity type
#[derive(Debug, Clone)]
pub struct StateTable {
    names: Vec<String>,
    descriptions: Vec<String>,
    index: HashMap<String, StateId>,
}

impl Default for StateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTable {
    pub fn new() -> Self {
        let mut table = Self {
            names: Vec::new(),
            descriptions: Vec::new(),
            index: HashMap::new(),
        };
        table.intern(NONE_STATE, "");
        table
    }

    /// Look up or add a state; the first non-empty description wins
    pub fn intern(&mut self, name: &str, description: &str) -> StateId {
        if let Some(id) = self.index.get(name).copied() {
            if self.descriptions[id.index()].is_empty() && !description.is_empty() {
                self.descriptions[id.index()] = description.to_string();
            }
            return id;
        }
        let id = StateId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.descriptions.push(description.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<StateId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: StateId) -> &str {
        &self.names[id.index()]
    }

    pub fn description(&self, id: StateId) -> &str {
        &self.descriptions[id.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Processor bound to a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorRef {
    pub name: String,
    pub description: String,
    /// Entity types the processor is permitted to create
    pub adds_new_entities: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub name: String,
    pub description: String,
    pub start: StateId,
    pub end: StateId,
    pub automated: bool,
    pub criteria: Option<Predicate>,
    pub processor: Option<ProcessorRef>,
    pub(crate) schedule_transition_processors: Vec<serde_json::Value>,
    pub(crate) had_processes: bool,
}

/// Validated, read-only workflow for one entity type
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    entity_type: String,
    name: String,
    description: String,
    states: StateTable,
    transitions: Vec<Transition>,
    outgoing: Vec<Vec<usize>>,
}

/// `(start_state, end_state, automated, processor)` summary of one transition
pub type TransitionTuple = (String, String, bool, Option<String>);

impl WorkflowDefinition {
    pub(crate) fn new(
        entity_type: String,
        name: String,
        description: String,
        states: StateTable,
        transitions: Vec<Transition>,
    ) -> Self {
        let mut outgoing = vec![Vec::new(); states.len()];
        for (position, transition) in transitions.iter().enumerate() {
            outgoing[transition.start.index()].push(position);
        }
        Self {
            entity_type,
            name,
            description,
            states,
            transitions,
            outgoing,
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn states(&self) -> &StateTable {
        &self.states
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn state_name(&self, id: StateId) -> &str {
        self.states.name(id)
    }

    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.states.id(name)
    }

    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.name == name)
    }

    /// Transitions leaving `state`, in declaration order
    pub fn transitions_from(&self, state: StateId) -> impl Iterator<Item = &Transition> {
        self.outgoing
            .get(state.index())
            .into_iter()
            .flatten()
            .map(move |&position| &self.transitions[position])
    }

    /// A state with no automated way out
    pub fn is_terminal(&self, state: StateId) -> bool {
        !self.transitions_from(state).any(|t| t.automated)
    }

    pub fn processors(&self) -> impl Iterator<Item = (&Transition, &ProcessorRef)> {
        self.transitions
            .iter()
            .filter_map(|t| t.processor.as_ref().map(|p| (t, p)))
    }

    pub fn transition_tuples(&self) -> Vec<TransitionTuple> {
        self.transitions
            .iter()
            .map(|t| {
                (
                    self.state_name(t.start).to_string(),
                    self.state_name(t.end).to_string(),
                    t.automated,
                    t.processor.as_ref().map(|p| p.name.clone()),
                )
            })
            .collect()
    }

    /// Rebuild the document form of this workflow
    pub fn to_document(&self) -> WorkflowDocument {
        let transitions = self
            .transitions
            .iter()
            .map(|t| {
                let processes = if t.had_processes || t.processor.is_some() {
                    Some(ProcessesDocument {
                        externalized_processors: t
                            .processor
                            .iter()
                            .map(|p| ExternalizedProcessorDocument {
                                name: p.name.clone(),
                                description: p.description.clone(),
                                adds_new_entities: p.adds_new_entities.clone(),
                            })
                            .collect(),
                        schedule_transition_processors: t.schedule_transition_processors.clone(),
                    })
                } else {
                    None
                };
                TransitionDocument {
                    name: t.name.clone(),
                    automated: t.automated,
                    description: t.description.clone(),
                    start_state: self.state_name(t.start).to_string(),
                    start_state_description: self.states.description(t.start).to_string(),
                    end_state: self.state_name(t.end).to_string(),
                    end_state_description: self.states.description(t.end).to_string(),
                    criteria: t
                        .criteria
                        .as_ref()
                        .and_then(|c| serde_json::to_value(c).ok()),
                    processes,
                }
            })
            .collect();

        WorkflowDocument {
            description: self.description.clone(),
            name: self.name.clone(),
            transitions,
        }
    }
}

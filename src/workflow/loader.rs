// Workflow Definition Loader
//
// Parses workflow documents into typed graphs and validates them eagerly so
// nothing structural can fail once triggers start flowing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use tracing::{debug, info, warn};

use super::criteria::Predicate;
use super::definition::{ProcessorRef, StateId, StateTable, Transition, WorkflowDefinition};
use super::document::WorkflowDocument;
use crate::errors::DefinitionError;
use crate::model::NONE_STATE;
use crate::registry::ProcessorRegistry;

pub const WORKFLOW_FILE_NAME: &str = "workflow.json";

/// Values substituted into workflow files before parsing
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    pub entity_version: String,
    pub chat_id: String,
}

impl Placeholders {
    /// Substitute into raw JSON text; values are escaped for use inside strings
    pub fn apply(&self, raw: &str, entity_type: &str) -> String {
        raw.replace("ENTITY_VERSION_VAR", &json_escaped(&self.entity_version))
            .replace("ENTITY_MODEL_VAR", &json_escaped(entity_type))
            .replace("CHAT_ID_VAR", &json_escaped(&self.chat_id))
    }
}

fn json_escaped(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

pub struct WorkflowLoader<'a> {
    registry: &'a ProcessorRegistry,
    unresolved: HashSet<String>,
    allow_unresolved: bool,
}

impl<'a> WorkflowLoader<'a> {
    pub fn new(registry: &'a ProcessorRegistry) -> Self {
        Self {
            registry,
            unresolved: HashSet::new(),
            allow_unresolved: false,
        }
    }

    /// Processor names accepted even though nothing is registered for them
    pub fn with_unresolved<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unresolved.extend(names.into_iter().map(Into::into));
        self
    }

    /// Accept every unregistered processor name (validation-only tooling)
    pub fn allow_all_unresolved(mut self, allow: bool) -> Self {
        self.allow_unresolved = allow;
        self
    }

    /// Parse and validate one raw JSON workflow
    pub fn load(&self, entity_type: &str, raw: &str) -> Result<WorkflowDefinition, DefinitionError> {
        let document =
            WorkflowDocument::from_json(raw).map_err(|source| DefinitionError::Parse {
                entity_type: entity_type.to_string(),
                source,
            })?;
        self.load_document(entity_type, document)
    }

    pub fn load_document(
        &self,
        entity_type: &str,
        document: WorkflowDocument,
    ) -> Result<WorkflowDefinition, DefinitionError> {
        if document.transitions.is_empty() {
            return Err(DefinitionError::Empty(entity_type.to_string()));
        }

        let mut states = StateTable::new();
        let mut transitions = Vec::with_capacity(document.transitions.len());
        let mut seen_names = HashSet::new();

        for raw in document.transitions {
            if !seen_names.insert(raw.name.clone()) {
                return Err(DefinitionError::DuplicateTransition {
                    entity_type: entity_type.to_string(),
                    transition: raw.name,
                });
            }
            if raw.end_state == NONE_STATE {
                return Err(DefinitionError::EndsInNone {
                    entity_type: entity_type.to_string(),
                    transition: raw.name,
                });
            }

            let start = states.intern(&raw.start_state, &raw.start_state_description);
            let end = states.intern(&raw.end_state, &raw.end_state_description);

            let criteria = match raw.criteria {
                Some(value) => Some(self.parse_criteria(entity_type, &raw.name, value)?),
                None => None,
            };

            let had_processes = raw.processes.is_some();
            let processes = raw.processes.unwrap_or_default();
            if processes.externalized_processors.len() > 1 {
                return Err(DefinitionError::MultipleProcessors {
                    entity_type: entity_type.to_string(),
                    transition: raw.name,
                });
            }
            let processor = match processes.externalized_processors.into_iter().next() {
                Some(p) => {
                    self.check_processor(entity_type, &raw.name, &p.name)?;
                    Some(ProcessorRef {
                        name: p.name,
                        description: p.description,
                        adds_new_entities: p.adds_new_entities,
                    })
                }
                None => None,
            };

            transitions.push(Transition {
                name: raw.name,
                description: raw.description,
                start,
                end,
                automated: raw.automated,
                criteria,
                processor,
                schedule_transition_processors: processes.schedule_transition_processors,
                had_processes,
            });
        }

        check_reachability(entity_type, &states, &transitions)?;
        check_ambiguity(entity_type, &states, &transitions)?;

        debug!(
            entity_type = %entity_type,
            states = states.len(),
            transitions = transitions.len(),
            "Workflow definition validated"
        );

        Ok(WorkflowDefinition::new(
            entity_type.to_string(),
            document.name,
            document.description,
            states,
            transitions,
        ))
    }

    /// Load every `<entity_type>/workflow.json` directly under `root`
    pub fn load_dir(
        &self,
        root: &Path,
        placeholders: &Placeholders,
    ) -> Result<Vec<WorkflowDefinition>, DefinitionError> {
        let io_error = |source| DefinitionError::Io {
            path: root.to_path_buf(),
            source,
        };
        let mut entries: Vec<_> = std::fs::read_dir(root)
            .map_err(io_error)?
            .collect::<Result<_, _>>()
            .map_err(io_error)?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut definitions = Vec::new();
        for entry in entries {
            let path = entry.path().join(WORKFLOW_FILE_NAME);
            if !path.is_file() {
                continue;
            }
            let Some(entity_type) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "Skipping workflow with a non UTF-8 directory name");
                continue;
            };
            let raw = std::fs::read_to_string(&path).map_err(|source| DefinitionError::Io {
                path: path.clone(),
                source,
            })?;
            let raw = placeholders.apply(&raw, &entity_type);
            definitions.push(self.load(&entity_type, &raw)?);
        }

        info!(
            root = %root.display(),
            count = definitions.len(),
            "Loaded workflow definitions"
        );
        Ok(definitions)
    }

    fn parse_criteria(
        &self,
        entity_type: &str,
        transition: &str,
        value: serde_json::Value,
    ) -> Result<Predicate, DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidCriteria {
            entity_type: entity_type.to_string(),
            transition: transition.to_string(),
            reason,
        };
        let predicate: Predicate =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        predicate.validate().map_err(invalid)?;
        Ok(predicate)
    }

    fn check_processor(
        &self,
        entity_type: &str,
        transition: &str,
        processor: &str,
    ) -> Result<(), DefinitionError> {
        if self.registry.contains(processor) {
            return Ok(());
        }
        if self.allow_unresolved || self.unresolved.contains(processor) {
            warn!(
                entity_type = %entity_type,
                transition = %transition,
                processor = %processor,
                "Processor marked unresolved; transition will fail if it fires"
            );
            return Ok(());
        }
        Err(DefinitionError::UnknownProcessor {
            entity_type: entity_type.to_string(),
            transition: transition.to_string(),
            processor: processor.to_string(),
        })
    }
}

fn check_reachability(
    entity_type: &str,
    states: &StateTable,
    transitions: &[Transition],
) -> Result<(), DefinitionError> {
    let mut edges: HashMap<StateId, Vec<StateId>> = HashMap::new();
    for t in transitions {
        edges.entry(t.start).or_default().push(t.end);
    }

    let mut reached = vec![false; states.len()];
    reached[StateId::NONE.index()] = true;
    let mut queue = VecDeque::from([StateId::NONE]);
    while let Some(state) = queue.pop_front() {
        for &next in edges.get(&state).into_iter().flatten() {
            if !reached[next.index()] {
                reached[next.index()] = true;
                queue.push_back(next);
            }
        }
    }

    match transitions.iter().find(|t| !reached[t.start.index()]) {
        Some(t) => Err(DefinitionError::UnreachableState {
            entity_type: entity_type.to_string(),
            state: states.name(t.start).to_string(),
            transition: t.name.clone(),
        }),
        None => Ok(()),
    }
}

fn check_ambiguity(
    entity_type: &str,
    states: &StateTable,
    transitions: &[Transition],
) -> Result<(), DefinitionError> {
    let automated: Vec<&Transition> = transitions.iter().filter(|t| t.automated).collect();
    for (i, first) in automated.iter().enumerate() {
        if let Some(second) = automated[i + 1..]
            .iter()
            .find(|other| other.start == first.start && other.criteria == first.criteria)
        {
            return Err(DefinitionError::AmbiguousTransitions {
                entity_type: entity_type.to_string(),
                state: states.name(first.start).to_string(),
                first: first.name.clone(),
                second: second.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(transitions: serde_json::Value) -> String {
        json!({"name": "wf", "description": "", "transitions": transitions}).to_string()
    }

    fn loader(registry: &ProcessorRegistry) -> WorkflowLoader<'_> {
        WorkflowLoader::new(registry)
    }

    #[test]
    fn test_loads_linear_workflow() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "created"},
            {"name": "finish", "automated": false, "start_state": "created", "end_state": "done"}
        ]));
        let def = loader(&registry).load("job", &raw).unwrap();
        assert_eq!(def.entity_type(), "job");
        assert_eq!(def.states().len(), 3);
        assert_eq!(def.transitions().len(), 2);
    }

    #[test]
    fn test_rejects_unreachable_start_state() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "created"},
            {"name": "orphan", "automated": true, "start_state": "floating", "end_state": "done"}
        ]));
        let err = loader(&registry).load("job", &raw).unwrap_err();
        assert!(matches!(err, DefinitionError::UnreachableState { ref state, .. } if state == "floating"));
    }

    #[test]
    fn test_rejects_ambiguous_automated_transitions() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "a"},
            {"name": "left", "automated": true, "start_state": "a", "end_state": "b"},
            {"name": "right", "automated": true, "start_state": "a", "end_state": "c"}
        ]));
        let err = loader(&registry).load("job", &raw).unwrap_err();
        assert!(matches!(err, DefinitionError::AmbiguousTransitions { ref first, ref second, .. }
            if first == "left" && second == "right"));
    }

    #[test]
    fn test_distinct_criteria_are_not_ambiguous() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "a"},
            {"name": "ok", "automated": true, "start_state": "a", "end_state": "b",
             "criteria": {"type": "simple", "jsonPath": "$.ok", "operation": "EQUALS", "value": true}},
            {"name": "failed", "automated": true, "start_state": "a", "end_state": "c",
             "criteria": {"type": "simple", "jsonPath": "$.ok", "operation": "EQUALS", "value": false}}
        ]));
        assert!(loader(&registry).load("job", &raw).is_ok());
    }

    #[test]
    fn test_unknown_processor_fails_closed() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "a",
             "processes": {"externalized_processors": [{"name": "ingest", "description": ""}],
                           "schedule_transition_processors": []}}
        ]));
        let err = loader(&registry).load("job", &raw).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownProcessor { ref processor, .. } if processor == "ingest"));

        let def = loader(&registry)
            .with_unresolved(["ingest"])
            .load("job", &raw)
            .unwrap();
        assert_eq!(def.processors().count(), 1);
    }

    #[test]
    fn test_rejects_end_in_none_and_duplicates() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "undo", "automated": true, "start_state": "None", "end_state": "None"}
        ]));
        assert!(matches!(
            loader(&registry).load("job", &raw),
            Err(DefinitionError::EndsInNone { .. })
        ));

        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "a"},
            {"name": "create", "automated": false, "start_state": "a", "end_state": "b"}
        ]));
        assert!(matches!(
            loader(&registry).load("job", &raw),
            Err(DefinitionError::DuplicateTransition { .. })
        ));

        assert!(matches!(
            loader(&registry).load("job", &doc(json!([]))),
            Err(DefinitionError::Empty(_))
        ));
    }

    #[test]
    fn test_invalid_criteria_is_a_definition_error() {
        let registry = ProcessorRegistry::builder().build();
        let raw = doc(json!([
            {"name": "create", "automated": true, "start_state": "None", "end_state": "a",
             "criteria": {"type": "simple", "jsonPath": "$.x", "operation": "MATCHES_REGEX", "value": "x"}}
        ]));
        assert!(matches!(
            loader(&registry).load("job", &raw),
            Err(DefinitionError::InvalidCriteria { .. })
        ));
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let placeholders = Placeholders {
            entity_version: "1000".to_string(),
            chat_id: "chat-1".to_string(),
        };
        let out = placeholders.apply("ENTITY_MODEL_VAR@ENTITY_VERSION_VAR/CHAT_ID_VAR", "report");
        assert_eq!(out, "report@1000/chat-1");
    }

    #[test]
    fn test_placeholder_values_are_json_escaped() {
        let registry = ProcessorRegistry::builder().build();
        let placeholders = Placeholders {
            entity_version: "1000".to_string(),
            chat_id: r#"team "ops" \ night"#.to_string(),
        };
        let raw = placeholders.apply(
            &doc(json!([
                {"name": "create", "automated": true, "start_state": "None",
                 "end_state": "created", "description": "for CHAT_ID_VAR"}
            ])),
            "job",
        );
        let def = loader(&registry).load("job", &raw).unwrap();
        assert_eq!(def.transitions()[0].description, r#"for team "ops" \ night"#);
    }

    #[test]
    fn test_load_dir_uses_directory_names() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path().join("job");
        std::fs::create_dir(&job_dir).unwrap();
        std::fs::write(
            job_dir.join(WORKFLOW_FILE_NAME),
            doc(json!([
                {"name": "create", "automated": true, "start_state": "None",
                 "end_state": "created", "description": "ENTITY_MODEL_VAR v ENTITY_VERSION_VAR"}
            ])),
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let registry = ProcessorRegistry::builder().build();
        let placeholders = Placeholders {
            entity_version: "1000".to_string(),
            chat_id: String::new(),
        };
        let defs = loader(&registry).load_dir(dir.path(), &placeholders).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].entity_type(), "job");
        assert_eq!(defs[0].transitions()[0].description, "job v 1000");
    }
}

// Error taxonomy for loading definitions and advancing entities
//
// Load-time errors (DefinitionError, DependencyError) abort startup.
// Everything else is reported per transition and never touches other entities.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::model::TechnicalId;

/// Malformed or ambiguous workflow graph
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read workflow file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workflow for '{entity_type}' could not be parsed: {source}")]
    Parse {
        entity_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("workflow for '{0}' declares no transitions")]
    Empty(String),

    #[error("workflow for '{0}' is loaded more than once")]
    DuplicateEntityType(String),

    #[error("transition name '{transition}' is used more than once in workflow for '{entity_type}'")]
    DuplicateTransition {
        entity_type: String,
        transition: String,
    },

    #[error("transition '{transition}' of '{entity_type}' ends in the reserved state \"None\"")]
    EndsInNone {
        entity_type: String,
        transition: String,
    },

    #[error(
        "state '{state}' of '{entity_type}' is a start state (transition '{transition}') \
         but cannot be reached from \"None\""
    )]
    UnreachableState {
        entity_type: String,
        state: String,
        transition: String,
    },

    #[error(
        "transitions '{first}' and '{second}' of '{entity_type}' are both automated \
         from '{state}' with the same criteria"
    )]
    AmbiguousTransitions {
        entity_type: String,
        state: String,
        first: String,
        second: String,
    },

    #[error("transition '{transition}' of '{entity_type}' declares more than one processor")]
    MultipleProcessors {
        entity_type: String,
        transition: String,
    },

    #[error(
        "processor '{processor}' used by transition '{transition}' of '{entity_type}' \
         is not registered and not marked unresolved"
    )]
    UnknownProcessor {
        entity_type: String,
        transition: String,
        processor: String,
    },

    #[error("processor '{0}' is registered more than once")]
    DuplicateProcessor(String),

    #[error("invalid criteria on transition '{transition}' of '{entity_type}': {reason}")]
    InvalidCriteria {
        entity_type: String,
        transition: String,
        reason: String,
    },
}

/// Cyclic or unresolved dependency graph between entity types
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("dependency cycle detected involving entity type '{0}'")]
    Cycle(String),

    #[error("entity type '{0}' declares itself as its own dependent")]
    SelfDependency(String),

    #[error("entity type '{dependent}' is created by '{declared_by}' but has no workflow definition")]
    UnresolvedEntityType {
        dependent: String,
        declared_by: String,
    },

    #[error("entity type '{dependent}' is gated by both {first} and {second}")]
    MultipleDependencies {
        dependent: String,
        first: String,
        second: String,
    },
}

/// A named transition was requested on an entity sitting in another state
#[derive(Debug, Error)]
#[error(
    "transition '{transition}' starts at '{expected}' but {entity_type} {technical_id} is in state '{actual}'"
)]
pub struct StateMismatchError {
    pub entity_type: String,
    pub technical_id: TechnicalId,
    pub transition: String,
    pub expected: String,
    pub actual: String,
}

/// A criteria predicate could not be evaluated
#[derive(Debug, Error)]
#[error("criteria '{operation}' on '{path}' failed: {reason}")]
pub struct CriteriaError {
    pub path: String,
    pub operation: String,
    pub reason: String,
}

/// Entity store adapter failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity_type} {technical_id} not found")]
    NotFound {
        entity_type: String,
        technical_id: TechnicalId,
    },

    #[error("{entity_type} {technical_id} was expected in state '{expected}' but is in '{actual}'")]
    Conflict {
        entity_type: String,
        technical_id: TechnicalId,
        expected: String,
        actual: String,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// External compute (inference) failures
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("prompt of {size} bytes exceeds the {limit} byte limit")]
    PromptTooLarge { size: usize, limit: usize },

    #[error("inference service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed inference answer: {0}")]
    MalformedAnswer(String),
}

/// Why a processor-class failure happened
#[derive(Debug, Error)]
pub enum ProcessorFailure {
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("processor '{0}' is not registered")]
    Unregistered(String),

    #[error("creating '{0}' entities is not declared in adds_new_entities")]
    DependentNotPermitted(String),
}

/// A transition aborted; the entity stays at its start state
#[derive(Debug, Error)]
#[error("transition '{transition}' on {entity_type} {technical_id} failed: {failure}")]
pub struct ProcessorError {
    pub transition: String,
    pub entity_type: String,
    pub technical_id: TechnicalId,
    #[source]
    pub failure: ProcessorFailure,
}

impl ProcessorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, ProcessorFailure::Timeout(_))
    }
}

/// Top-level error surfaced by the engine and the dispatcher
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    StateMismatch(#[from] StateMismatchError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no workflow is loaded for entity type '{0}'")]
    UnknownEntityType(String),

    #[error("{entity_type} {technical_id} is in state '{state}', which its workflow does not declare")]
    UndeclaredState {
        entity_type: String,
        technical_id: TechnicalId,
        state: String,
    },

    #[error("workflow for '{entity_type}' has no transition named '{transition}'")]
    UnknownTransition {
        entity_type: String,
        transition: String,
    },

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Errors that must stop the process at startup
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, EngineError::Definition(_) | EngineError::Dependency(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DefinitionError::Empty("job".to_string());
        assert_eq!(err.to_string(), "workflow for 'job' declares no transitions");

        let err = DependencyError::Cycle("report".to_string());
        assert_eq!(
            err.to_string(),
            "dependency cycle detected involving entity type 'report'"
        );
    }

    #[test]
    fn test_processor_error_carries_transition_and_entity() {
        let id = TechnicalId::new();
        let err = ProcessorError {
            transition: "fetch_data".to_string(),
            entity_type: "job".to_string(),
            technical_id: id,
            failure: ProcessorFailure::Timeout(Duration::from_secs(5)),
        };
        let message = err.to_string();
        assert!(message.contains("fetch_data"));
        assert!(message.contains(&id.to_string()));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_startup_fatal_classification() {
        assert!(EngineError::from(DefinitionError::Empty("x".into())).is_startup_fatal());
        assert!(EngineError::from(DependencyError::Cycle("x".into())).is_startup_fatal());
        assert!(!EngineError::ShuttingDown.is_startup_fatal());
    }
}

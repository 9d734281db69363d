//! Declarative workflow definitions
//!
//! A workflow is loaded from its JSON document, validated once, and kept as a
//! typed, read-only graph for the lifetime of the process.

pub mod criteria;
pub mod definition;
pub mod document;
pub mod loader;
pub mod set;

pub use criteria::{GroupCondition, GroupOperator, JsonPath, Operation, Predicate, SimpleCondition};
pub use definition::{
    ProcessorRef, StateId, StateTable, Transition, TransitionTuple, WorkflowDefinition,
};
pub use document::{
    ExternalizedProcessorDocument, ProcessesDocument, TransitionDocument, WorkflowDocument,
};
pub use loader::{Placeholders, WorkflowLoader, WORKFLOW_FILE_NAME};
pub use set::WorkflowSet;

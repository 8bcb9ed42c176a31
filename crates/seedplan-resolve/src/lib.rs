//! Per-record constraint resolution.
//!
//! Given a record about to be inserted and the constraints of its table,
//! [`ConstraintDependencyResolver`] works out which records must exist first
//! (as ordered [`DependencyOperation`]s) and which fields of the record should
//! change, optionally applying the operations through a [`RecordWriter`].

pub mod errors;
pub mod executor;
pub mod model;
pub mod resolver;
pub mod rules;
pub mod scan;

pub use errors::WriteError;
pub use executor::{
    InMemoryRecordWriter, RecordWriter, execute_operations, substitute_placeholders,
};
pub use model::{
    DependencyOperation, ExecutedOperation, ExecutionReport, FailedOperation, OperationKind,
    Record, RecordModification, ResolutionMetrics, ResolutionResult, ResolverOptions, placeholder,
};
pub use resolver::ConstraintDependencyResolver;
pub use rules::{DependencyRule, RuleInput, RuleOutcome, default_rules};

//! Core contracts shared by the seedplan crates.
//!
//! This crate defines the schema snapshot consumed by the graph planner, the
//! constraint model consumed by the record resolver, and the validation
//! helpers applied to both before any planning happens.

pub mod constraints;
pub mod error;
pub mod schema;
pub mod validation;

pub use constraints::{ConstraintKind, FkAction, TableConstraint, constraint_priority};
pub use error::{Error, Result};
pub use schema::{RelationshipInput, SchemaSnapshot, SizeClass, TableInput, TableMetadata};
pub use validation::{
    IssueSeverity, ValidationIssue, ValidationReport, snapshot_json_schema, validate_snapshot,
    validate_snapshot_json,
};

/// Current contract version for snapshot documents.
pub const SNAPSHOT_VERSION: &str = "0.1";

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Record payload: column name to JSON value.
pub type Record = Map<String, Value>;

/// Reference to a field of a record created earlier in the same run.
pub fn placeholder(table: &str, field: &str) -> String {
    format!("${{{table}.{field}}}")
}

/// Kind of write a dependency operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Link,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Link => "link",
        }
    }
}

/// A record in another table needed by the record being inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyOperation {
    pub kind: OperationKind,
    pub table: String,
    pub data: Record,
    pub reason: String,
    /// Lower runs first.
    pub priority: u32,
    /// Target tables of other operations that must run before this one.
    pub depends_on: Vec<String>,
    /// Rule that produced the operation.
    pub rule: String,
}

impl DependencyOperation {
    pub fn new(
        kind: OperationKind,
        table: impl Into<String>,
        data: Record,
        reason: impl Into<String>,
        priority: u32,
    ) -> Self {
        Self {
            kind,
            table: table.into(),
            data,
            reason: reason.into(),
            priority,
            depends_on: Vec::new(),
            rule: String::new(),
        }
    }

    pub fn depends_on(mut self, table: impl Into<String>) -> Self {
        self.depends_on.push(table.into());
        self
    }
}

/// Field-level fix applied to the record to satisfy a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordModification {
    pub table: String,
    pub record_id: String,
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub reason: String,
    /// 0-1.
    pub confidence: f64,
}

/// Resolver settings, usually loaded from the `[resolver]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Skip constraints whose prerequisites stay unresolved instead of
    /// processing them with a warning.
    pub strict_mode: bool,
    /// Maximum number of resolution passes over the constraint list.
    pub max_resolution_depth: usize,
    /// Tables already holding rows the record may reference.
    pub existing_tables: Vec<String>,
    /// Table names matched as whole words inside check predicates.
    pub known_tables: Vec<String>,
    pub invitation_expiry_days: i64,
    pub default_role: String,
    pub valid_roles: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_resolution_depth: 10,
            existing_tables: Vec::new(),
            known_tables: Vec::new(),
            invitation_expiry_days: 7,
            default_role: "member".to_string(),
            valid_roles: ["owner", "admin", "member", "viewer"]
                .iter()
                .map(|role| role.to_string())
                .collect(),
        }
    }
}

/// Operation applied successfully by the record writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedOperation {
    pub kind: OperationKind,
    pub table: String,
    pub record_id: String,
}

/// Operation the record writer could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub kind: OperationKind,
    pub table: String,
    pub error: String,
}

/// Outcome of executing dependency operations; partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub succeeded: Vec<ExecutedOperation>,
    pub failed: Vec<FailedOperation>,
    /// Created records by table, with their assigned `id`.
    pub created: BTreeMap<String, Record>,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionMetrics {
    pub elapsed_ms: u64,
    pub tables_analyzed: usize,
    pub constraints_processed: usize,
    pub dependencies_created: usize,
}

/// Result of resolving the constraints of one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub constraints_resolved: usize,
    pub operations: Vec<DependencyOperation>,
    pub modifications: Vec<RecordModification>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    pub metrics: ResolutionMetrics,
}

use std::collections::{BTreeMap, BTreeSet};

use jsonschema::JSONSchema;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::SchemaSnapshot;

/// Whether an issue blocks planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// The snapshot cannot be planned.
    Error,
    /// The planner accepts the snapshot but drops or ignores part of it.
    Warning,
}

/// One problem found in a snapshot document.
///
/// `path` is a JSON pointer into the snapshot (`/tables/3/name`,
/// `/relationships/0/to_table`), `code` a stable snake_case identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: String,
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ValidationIssue {
    /// Create an issue with an explicit severity.
    pub fn new(
        severity: IssueSeverity,
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            severity,
            code: code.into(),
            path: path.into(),
            message: message.into(),
            hint,
        }
    }

    /// Blocking issue at `path`.
    pub fn error(
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(IssueSeverity::Error, code, path, message, None)
    }

    /// Non-blocking issue at `path`.
    pub fn warning(
        code: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(IssueSeverity::Warning, code, path, message, None)
    }

    /// Attach a suggestion for fixing the snapshot.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Issues found in one snapshot, split by severity.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when the snapshot can be planned; warnings do not count.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record an issue under its own severity.
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            IssueSeverity::Error => self.errors.push(issue),
            IssueSeverity::Warning => self.warnings.push(issue),
        }
    }

    /// Issues carrying `code`, errors first.
    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a ValidationIssue> {
        self.errors
            .iter()
            .chain(&self.warnings)
            .filter(move |issue| issue.code == code)
    }

    /// Append the issues of a later validation pass.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// JSON Schema describing [`SchemaSnapshot`] documents.
pub fn snapshot_json_schema() -> Result<Value> {
    Ok(serde_json::to_value(schema_for!(SchemaSnapshot))?)
}

/// Validate a snapshot JSON document against the snapshot JSON Schema.
pub fn validate_snapshot_json(snapshot_json: &Value) -> Result<ValidationReport> {
    let schema = snapshot_json_schema()?;
    let compiled = JSONSchema::compile(&schema).map_err(|err| Error::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();
    if let Err(errors) = compiled.validate(snapshot_json) {
        for error in errors {
            let path = error.instance_path.to_string();
            report.push(ValidationIssue::error(
                "schema_violation",
                if path.is_empty() { "/".to_string() } else { path },
                error.to_string(),
            ));
        }
    }

    Ok(report)
}

/// Validate internal consistency of a snapshot.
///
/// Duplicate and unnamed tables are errors. Relationships pointing at tables
/// outside the snapshot and self references are warnings: the planner still
/// accepts them.
pub fn validate_snapshot(snapshot: &SchemaSnapshot) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();

    for (idx, table) in snapshot.tables.iter().enumerate() {
        let path = format!("/tables/{idx}/name");
        if table.name.trim().is_empty() {
            report.push(ValidationIssue::error(
                "table_name_empty",
                path,
                "table name must not be empty",
            ));
            continue;
        }

        if let Some(first) = seen.insert(table.name.as_str(), idx) {
            seen.insert(table.name.as_str(), first);
            report.push(
                ValidationIssue::error(
                    "duplicate_table",
                    path,
                    format!("duplicate table name: {}", table.name),
                )
                .with_hint(format!("table already registered at /tables/{first}")),
            );
        }
    }

    let known: BTreeSet<&str> = seen.keys().copied().collect();

    for (idx, relationship) in snapshot.relationships.iter().enumerate() {
        let base_path = format!("/relationships/{idx}");

        for (field, table) in [
            ("from_table", &relationship.from_table),
            ("to_table", &relationship.to_table),
        ] {
            if !known.contains(table.as_str()) {
                report.push(
                    ValidationIssue::warning(
                        "unknown_table_reference",
                        format!("{base_path}/{field}"),
                        format!(
                            "relationship {} references unknown table: {}",
                            relationship.constraint_name(),
                            table
                        ),
                    )
                    .with_hint("add the table to the snapshot or drop the relationship"),
                );
            }
        }

        if relationship.from_table == relationship.to_table {
            report.push(
                ValidationIssue::warning(
                    "self_reference",
                    base_path,
                    format!(
                        "{} references its own table {}",
                        relationship.constraint_name(),
                        relationship.from_table
                    ),
                )
                .with_hint("self references are ignored when ordering tables"),
            );
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RelationshipInput, TableInput};

    fn snapshot(tables: &[&str], relationships: Vec<RelationshipInput>) -> SchemaSnapshot {
        SchemaSnapshot {
            snapshot_version: crate::SNAPSHOT_VERSION.to_string(),
            tables: tables.iter().map(|name| TableInput::new(*name)).collect(),
            relationships,
        }
    }

    #[test]
    fn duplicate_tables_are_errors() {
        let report = validate_snapshot(&snapshot(&["users", "users"], Vec::new()));
        assert!(!report.is_ok());
        assert_eq!(report.errors[0].code, "duplicate_table");
        assert_eq!(report.errors[0].path, "/tables/1/name");
    }

    #[test]
    fn dangling_relationships_are_warnings() {
        let report = validate_snapshot(&snapshot(
            &["orders"],
            vec![RelationshipInput::required("orders", "user_id", "users")],
        ));
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].code, "unknown_table_reference");
        assert_eq!(report.warnings[0].path, "/relationships/0/to_table");
    }

    #[test]
    fn issues_land_under_their_severity() {
        let report = validate_snapshot(&snapshot(
            &["users", "", "users"],
            vec![RelationshipInput::required("users", "invited_by", "users").nullable()],
        ));
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.with_code("table_name_empty").count(), 1);

        let duplicate = report.with_code("duplicate_table").next().expect("duplicate issue");
        assert_eq!(duplicate.severity, IssueSeverity::Error);
        assert_eq!(duplicate.hint.as_deref(), Some("table already registered at /tables/0"));
        assert!(report.with_code("self_reference").all(|issue| issue.severity == IssueSeverity::Warning));
    }

    #[test]
    fn self_references_are_warnings() {
        let report = validate_snapshot(&snapshot(
            &["employees"],
            vec![RelationshipInput::required("employees", "manager_id", "employees").nullable()],
        ));
        assert!(report.is_ok());
        assert_eq!(report.warnings[0].code, "self_reference");
    }

    #[test]
    fn json_schema_rejects_missing_tables() {
        let report = validate_snapshot_json(&serde_json::json!({"relationships": []}))
            .expect("compile snapshot schema");
        assert!(!report.is_ok());
        assert_eq!(report.errors[0].code, "schema_violation");
    }

    #[test]
    fn json_schema_accepts_minimal_snapshot() {
        let report = validate_snapshot_json(&serde_json::json!({
            "tables": [{"name": "users"}, {"name": "orders", "metadata": {"has_timestamps": true}}],
            "relationships": [
                {"from_table": "orders", "from_column": "user_id", "to_table": "users", "on_delete": "cascade"}
            ]
        }))
        .expect("compile snapshot schema");
        assert!(report.is_ok(), "unexpected errors: {:?}", report.errors);
    }
}

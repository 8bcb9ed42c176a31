use std::collections::{BTreeMap, BTreeSet};

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::WriteError;
use crate::model::{
    DependencyOperation, ExecutedOperation, ExecutionReport, FailedOperation, OperationKind,
    Record,
};

const PLACEHOLDER_PATTERN: &str = r"\$\{([A-Za-z0-9_.]+)\.([A-Za-z0-9_]+)\}";

/// Collaborator that persists dependency records.
pub trait RecordWriter {
    /// Insert a record and return its identifier.
    fn create_record(&mut self, table: &str, data: &Record) -> Result<String, WriteError>;
    /// Update the record identified by `data["id"]`.
    fn update_record(&mut self, table: &str, data: &Record) -> Result<String, WriteError>;
    /// Insert a row attaching existing records to each other.
    fn link_records(&mut self, table: &str, data: &Record) -> Result<String, WriteError>;
}

/// Record writer keeping everything in memory; used for dry runs.
#[derive(Debug, Default)]
pub struct InMemoryRecordWriter {
    records: BTreeMap<String, Vec<Record>>,
    rejected_tables: BTreeSet<String>,
}

impl InMemoryRecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every write to `table`.
    pub fn reject_table(mut self, table: impl Into<String>) -> Self {
        self.rejected_tables.insert(table.into());
        self
    }

    pub fn records(&self, table: &str) -> &[Record] {
        self.records.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn insert(&mut self, table: &str, data: &Record) -> Result<String, WriteError> {
        if self.rejected_tables.contains(table) {
            return Err(WriteError::Rejected {
                table: table.to_string(),
                reason: "table is read-only".to_string(),
            });
        }

        let id = record_id(data).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut stored = data.clone();
        stored.insert("id".to_string(), Value::String(id.clone()));
        self.records.entry(table.to_string()).or_default().push(stored);
        Ok(id)
    }
}

/// String or numeric `id` of a record.
fn record_id(data: &Record) -> Option<String> {
    match data.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

impl RecordWriter for InMemoryRecordWriter {
    fn create_record(&mut self, table: &str, data: &Record) -> Result<String, WriteError> {
        self.insert(table, data)
    }

    fn update_record(&mut self, table: &str, data: &Record) -> Result<String, WriteError> {
        let Some(id) = record_id(data) else {
            return Err(WriteError::Rejected {
                table: table.to_string(),
                reason: "update requires an id".to_string(),
            });
        };
        let rows = self.records.entry(table.to_string()).or_default();
        match rows
            .iter_mut()
            .find(|row| record_id(row).as_deref() == Some(id.as_str()))
        {
            Some(row) => {
                row.extend(data.clone());
                row.insert("id".to_string(), Value::String(id.clone()));
                Ok(id)
            }
            None => Err(WriteError::Rejected {
                table: table.to_string(),
                reason: format!("no record with id {id}"),
            }),
        }
    }

    fn link_records(&mut self, table: &str, data: &Record) -> Result<String, WriteError> {
        self.insert(table, data)
    }
}

/// Apply operations in the given order through `writer`.
///
/// `origin` is the record being inserted; when it carries an `id`, its
/// placeholders resolve like those of created records. A failure is recorded
/// and the remaining operations still run; operations referencing a failed
/// table fail without reaching the writer.
pub fn execute_operations(
    operations: &[DependencyOperation],
    origin_table: &str,
    origin: &Record,
    writer: &mut dyn RecordWriter,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let placeholders = match Regex::new(PLACEHOLDER_PATTERN) {
        Ok(re) => re,
        Err(err) => {
            for operation in operations {
                report.failed.push(FailedOperation {
                    kind: operation.kind,
                    table: operation.table.clone(),
                    error: err.to_string(),
                });
            }
            return report;
        }
    };

    if origin.get("id").is_some_and(|id| !id.is_null()) {
        report
            .created
            .insert(origin_table.to_string(), origin.clone());
    }
    let mut failed_tables: BTreeSet<String> = BTreeSet::new();

    for operation in operations {
        let outcome = substitute_record(&operation.data, &placeholders, &report.created, &failed_tables)
            .and_then(|data| {
                let id = match operation.kind {
                    OperationKind::Create => writer.create_record(&operation.table, &data),
                    OperationKind::Update => writer.update_record(&operation.table, &data),
                    OperationKind::Link => writer.link_records(&operation.table, &data),
                }?;
                Ok((id, data))
            });

        match outcome {
            Ok((id, mut data)) => {
                debug!(table = %operation.table, kind = operation.kind.as_str(), id = %id, "dependency applied");
                data.insert("id".to_string(), Value::String(id.clone()));
                report.created.insert(operation.table.clone(), data);
                report.succeeded.push(ExecutedOperation {
                    kind: operation.kind,
                    table: operation.table.clone(),
                    record_id: id,
                });
            }
            Err(err) => {
                warn!(table = %operation.table, kind = operation.kind.as_str(), error = %err, "dependency failed");
                failed_tables.insert(operation.table.clone());
                report.failed.push(FailedOperation {
                    kind: operation.kind,
                    table: operation.table.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    report
}

/// Replace `${table.field}` references in `value` with fields of `created`.
pub fn substitute_placeholders(
    value: &Value,
    created: &BTreeMap<String, Record>,
) -> Result<Value, WriteError> {
    let placeholders =
        Regex::new(PLACEHOLDER_PATTERN).map_err(|err| WriteError::Other(err.to_string()))?;
    substitute_value(value, &placeholders, created, &BTreeSet::new())
}

fn substitute_record(
    data: &Record,
    placeholders: &Regex,
    created: &BTreeMap<String, Record>,
    failed: &BTreeSet<String>,
) -> Result<Record, WriteError> {
    data.iter()
        .map(|(key, value)| {
            substitute_value(value, placeholders, created, failed).map(|value| (key.clone(), value))
        })
        .collect()
}

fn substitute_value(
    value: &Value,
    placeholders: &Regex,
    created: &BTreeMap<String, Record>,
    failed: &BTreeSet<String>,
) -> Result<Value, WriteError> {
    match value {
        Value::String(text) => substitute_text(text, placeholders, created, failed),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, placeholders, created, failed))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            substitute_record(map, placeholders, created, failed).map(Value::Object)
        }
        other => Ok(other.clone()),
    }
}

fn substitute_text(
    text: &str,
    placeholders: &Regex,
    created: &BTreeMap<String, Record>,
    failed: &BTreeSet<String>,
) -> Result<Value, WriteError> {
    if let Some(caps) = placeholders.captures(text) {
        if caps.get(0).is_some_and(|whole| whole.range() == (0..text.len())) {
            return lookup(&caps, created, failed).cloned();
        }
    }

    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for caps in placeholders.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        output.push_str(&text[last..whole.start()]);
        match lookup(&caps, created, failed)? {
            Value::String(value) => output.push_str(value),
            other => output.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    output.push_str(&text[last..]);
    Ok(Value::String(output))
}

fn lookup<'a>(
    caps: &Captures<'_>,
    created: &'a BTreeMap<String, Record>,
    failed: &BTreeSet<String>,
) -> Result<&'a Value, WriteError> {
    let table = &caps[1];
    let field = &caps[2];
    if let Some(value) = created.get(table).and_then(|record| record.get(field)) {
        return Ok(value);
    }
    if failed.contains(table) {
        return Err(WriteError::DependencyFailed {
            table: table.to_string(),
        });
    }
    Err(WriteError::UnresolvedReference {
        placeholder: caps[0].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("record object")
    }

    fn create(table: &str, data: Value, priority: u32) -> DependencyOperation {
        DependencyOperation::new(OperationKind::Create, table, record(data), "test", priority)
    }

    #[test]
    fn substitutes_created_identifiers() {
        let operations = vec![
            create("organizations", json!({"id": "org-1", "name": "Acme"}), 10),
            create(
                "organization_members",
                json!({"organization_id": "${organizations.id}", "note": "member of ${organizations.name}"}),
                20,
            ),
        ];
        let mut writer = InMemoryRecordWriter::new();
        let report = execute_operations(&operations, "accounts", &Record::new(), &mut writer);

        assert!(report.is_complete());
        assert_eq!(report.succeeded.len(), 2);
        let member = &writer.records("organization_members")[0];
        assert_eq!(member.get("organization_id"), Some(&json!("org-1")));
        assert_eq!(member.get("note"), Some(&json!("member of Acme")));
    }

    #[test]
    fn origin_record_resolves_its_own_placeholder() {
        let operations = vec![DependencyOperation::new(
            OperationKind::Link,
            "account_members",
            record(json!({"account_id": "${accounts.id}", "role": "owner"})),
            "owner",
            50,
        )];
        let origin = record(json!({"id": 42}));
        let mut writer = InMemoryRecordWriter::new();
        let report = execute_operations(&operations, "accounts", &origin, &mut writer);

        assert!(report.is_complete());
        assert_eq!(
            writer.records("account_members")[0].get("account_id"),
            Some(&json!(42))
        );
    }

    #[test]
    fn failures_do_not_stop_remaining_operations() {
        let operations = vec![
            create("organizations", json!({"name": "Acme"}), 10),
            create("organization_members", json!({"organization_id": "${organizations.id}"}), 20),
            create("profiles", json!({"email": "ada@example.com"}), 30),
            create("audit_log", json!({"subject": "${projects.id}"}), 40),
        ];
        let mut writer = InMemoryRecordWriter::new().reject_table("organizations");
        let report = execute_operations(&operations, "accounts", &Record::new(), &mut writer);

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].table, "profiles");
        assert_eq!(report.failed.len(), 3);
        assert_eq!(
            report.failed[1].error,
            WriteError::DependencyFailed {
                table: "organizations".to_string()
            }
            .to_string()
        );
        assert_eq!(report.failed[2].error, "unresolved reference ${projects.id}");
        assert!(writer.records("organization_members").is_empty());
    }

    #[test]
    fn update_requires_existing_record() {
        let mut writer = InMemoryRecordWriter::new();
        let id = writer
            .create_record("plans", &record(json!({"name": "free"})))
            .expect("create plan");
        let updated = writer
            .update_record("plans", &record(json!({"id": id, "name": "pro"})))
            .expect("update plan");
        assert_eq!(updated, id);
        assert_eq!(writer.records("plans")[0].get("name"), Some(&json!("pro")));

        let missing = writer.update_record("plans", &record(json!({"id": "nope"})));
        assert!(matches!(missing, Err(WriteError::Rejected { .. })));
    }

    #[test]
    fn numeric_ids_round_trip_through_updates() {
        let mut writer = InMemoryRecordWriter::new();
        let id = writer
            .create_record("plans", &record(json!({"id": 5, "name": "free"})))
            .expect("create plan");
        assert_eq!(id, "5");

        let updated = writer
            .update_record("plans", &record(json!({"id": 5, "name": "pro"})))
            .expect("update plan by numeric id");
        assert_eq!(updated, "5");
        assert_eq!(writer.records("plans").len(), 1);
        assert_eq!(writer.records("plans")[0].get("name"), Some(&json!("pro")));
    }

    #[test]
    fn placeholders_resolve_against_created_records() {
        let mut created = BTreeMap::new();
        created.insert("organizations".to_string(), record(json!({"id": "org-9"})));

        let resolved = substitute_placeholders(&json!("${organizations.id}"), &created)
            .expect("resolve placeholder");
        assert_eq!(resolved, json!("org-9"));

        let missing = substitute_placeholders(&json!("${accounts.id}"), &created);
        assert!(matches!(missing, Err(WriteError::UnresolvedReference { .. })));
    }
}

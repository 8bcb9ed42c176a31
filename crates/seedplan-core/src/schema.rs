use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constraints::FkAction;

/// Schema snapshot handed over by an introspection collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SchemaSnapshot {
    /// Contract version for this snapshot format.
    #[serde(default = "default_snapshot_version")]
    pub snapshot_version: String,
    /// Tables to plan, in registration order.
    pub tables: Vec<TableInput>,
    /// Foreign-key relationships between tables.
    #[serde(default)]
    pub relationships: Vec<RelationshipInput>,
}

/// A table registered for seeding.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableInput {
    pub name: String,
    #[serde(default = "default_schema_name")]
    pub schema: String,
    #[serde(default)]
    pub metadata: TableMetadata,
}

impl TableInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: default_schema_name(),
            metadata: TableMetadata::default(),
        }
    }
}

/// Caller-supplied facts about a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableMetadata {
    /// Pure join table between two or more parents.
    #[serde(default)]
    pub is_junction_table: bool,
    /// Rows are owned by a tenant (account/organization) column.
    #[serde(default)]
    pub is_tenant_scoped: bool,
    #[serde(default)]
    pub has_timestamps: bool,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Overrides the size class derived from the table shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_size: Option<SizeClass>,
}

/// Rough expected row volume of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

/// One foreign key: `from_table.from_column` references `to_table.to_column`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelationshipInput {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    #[serde(default = "default_key_column")]
    pub to_column: String,
    #[serde(default)]
    pub on_delete: FkAction,
    #[serde(default)]
    pub on_update: FkAction,
    #[serde(default)]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_deferrable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_name: Option<String>,
}

impl RelationshipInput {
    /// A required (non-null, immediate) foreign key with default actions.
    pub fn required(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: default_key_column(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
            is_nullable: false,
            is_deferrable: false,
            constraint_name: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.is_deferrable = true;
        self
    }

    pub fn on_delete(mut self, action: FkAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Constraint name, falling back to the conventional `<table>_<column>_fkey`.
    pub fn constraint_name(&self) -> String {
        self.constraint_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_fkey", self.from_table, self.from_column))
    }
}

fn default_snapshot_version() -> String {
    crate::SNAPSHOT_VERSION.to_string()
}

fn default_schema_name() -> String {
    "public".to_string()
}

fn default_key_column() -> String {
    "id".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_fills_defaults() {
        let relationship: RelationshipInput = serde_json::from_str(
            r#"{"from_table": "orders", "from_column": "user_id", "to_table": "users"}"#,
        )
        .expect("parse relationship");
        assert_eq!(relationship.to_column, "id");
        assert_eq!(relationship.on_delete, FkAction::NoAction);
        assert!(!relationship.is_nullable);
        assert_eq!(relationship.constraint_name(), "orders_user_id_fkey");
    }

    #[test]
    fn table_defaults_to_public_schema() {
        let snapshot: SchemaSnapshot =
            serde_json::from_str(r#"{"tables": [{"name": "users"}]}"#).expect("parse snapshot");
        assert_eq!(snapshot.snapshot_version, crate::SNAPSHOT_VERSION);
        assert_eq!(snapshot.tables[0].schema, "public");
        assert_eq!(snapshot.tables[0].metadata, TableMetadata::default());
        assert!(snapshot.relationships.is_empty());
    }
}

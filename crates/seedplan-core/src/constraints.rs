use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Foreign key action semantics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    /// Extra edge weight contributed by this action when used as `ON DELETE`.
    pub fn delete_weight(self) -> u8 {
        match self {
            FkAction::Cascade => 2,
            FkAction::Restrict => 3,
            FkAction::SetNull => 1,
            FkAction::NoAction | FkAction::SetDefault => 0,
        }
    }
}

/// Constraint categories understood by the record resolver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    NotNull,
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

impl ConstraintKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintKind::NotNull => "not_null",
            ConstraintKind::PrimaryKey => "primary_key",
            ConstraintKind::ForeignKey => "foreign_key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::Check => "check",
        }
    }
}

/// Processing priority of a constraint kind; higher runs first.
pub fn constraint_priority(kind: ConstraintKind) -> u32 {
    match kind {
        ConstraintKind::NotNull => 100,
        ConstraintKind::PrimaryKey => 90,
        ConstraintKind::ForeignKey => 80,
        ConstraintKind::Unique => 70,
        ConstraintKind::Check => 60,
    }
}

/// A single table-level constraint as supplied to the record resolver.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableConstraint {
    pub name: String,
    pub kind: ConstraintKind,
    /// Constrained columns on the owning table.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Referenced table for foreign keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_table: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_columns: Vec<String>,
    /// Raw predicate text for check constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub is_deferrable: bool,
}

impl TableConstraint {
    pub fn priority(&self) -> u32 {
        constraint_priority(self.kind)
    }

    /// Constraint name and predicate lowercased, for keyword matching.
    pub fn searchable_text(&self) -> String {
        let mut text = self.name.to_lowercase();
        if let Some(expression) = &self.expression {
            text.push(' ');
            text.push_str(&expression.to_lowercase());
        }
        text
    }

    pub fn foreign_key(
        name: impl Into<String>,
        columns: &[&str],
        referenced_table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::ForeignKey,
            columns: columns.iter().map(|column| column.to_string()).collect(),
            referenced_table: Some(referenced_table.into()),
            referenced_columns: vec!["id".to_string()],
            expression: None,
            is_deferrable: false,
        }
    }

    pub fn check(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Check,
            columns: Vec::new(),
            referenced_table: None,
            referenced_columns: Vec::new(),
            expression: Some(expression.into()),
            is_deferrable: false,
        }
    }

    pub fn not_null(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::NotNull,
            columns: vec![column.into()],
            referenced_table: None,
            referenced_columns: Vec::new(),
            expression: None,
            is_deferrable: false,
        }
    }
}

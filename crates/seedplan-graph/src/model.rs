use std::collections::BTreeMap;

use serde::Serialize;

use seedplan_core::{FkAction, RelationshipInput, SizeClass};

use crate::cycles::CycleIndex;

/// How strongly an edge binds the referencing row to the referenced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Not nullable, checked immediately.
    Required,
    /// Nullable column; the reference can be filled in later.
    Optional,
    /// Not nullable but deferrable to commit time.
    Conditional,
}

/// Directed dependency: `from` references `to`, so `to` is seeded first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub from_column: String,
    pub to_column: String,
    pub edge_type: EdgeType,
    /// 1-10, higher means harder to break.
    pub weight: u8,
    pub constraint_name: String,
    /// The cycle may be broken at this edge without violating integrity.
    pub can_be_circular: bool,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

impl DependencyEdge {
    pub fn from_relationship(relationship: &RelationshipInput) -> Self {
        let edge_type = if relationship.is_nullable {
            EdgeType::Optional
        } else if relationship.is_deferrable {
            EdgeType::Conditional
        } else {
            EdgeType::Required
        };

        Self {
            from: relationship.from_table.clone(),
            to: relationship.to_table.clone(),
            from_column: relationship.from_column.clone(),
            to_column: relationship.to_column.clone(),
            edge_type,
            weight: edge_weight(relationship.is_nullable, relationship.on_delete),
            constraint_name: relationship.constraint_name(),
            can_be_circular: relationship.is_nullable || relationship.is_deferrable,
            on_delete: relationship.on_delete,
            on_update: relationship.on_update,
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.from == self.to
    }
}

/// Weight of a foreign-key edge: base 5, +3 when not nullable, plus the
/// delete action's severity, capped at 10.
pub fn edge_weight(is_nullable: bool, on_delete: FkAction) -> u8 {
    let mut weight = 5;
    if !is_nullable {
        weight += 3;
    }
    weight += on_delete.delete_weight();
    weight.clamp(1, 10)
}

/// Effort class of seeding a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedingComplexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeMetadata {
    pub is_junction_table: bool,
    pub is_tenant_scoped: bool,
    pub has_timestamps: bool,
    pub primary_key: Vec<String>,
    /// Outgoing foreign keys, including self references and dangling ones.
    pub foreign_key_count: usize,
    pub estimated_size: SizeClass,
    pub seeding_complexity: SeedingComplexity,
}

/// Graph vertex for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableNode {
    pub name: String,
    pub schema: String,
    /// Tables this table references.
    pub dependencies: Vec<String>,
    /// Tables referencing this table.
    pub dependents: Vec<String>,
    pub depth: u32,
    /// Higher seeds earlier when depth and cycle status tie.
    pub priority: u32,
    pub is_circular: bool,
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Insert inside one transaction with constraints checked at commit.
    DeferConstraints,
    /// Insert with the referencing column null, then patch it.
    NullInitially,
    /// Insert with a placeholder value and update once the target exists.
    PostInsertUpdate,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleComplexity {
    Simple,
    Complex,
}

/// A closed dependency path between two or more tables.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyCycle {
    /// Tables in discovery order; each references the next, the last
    /// references the first.
    pub tables: Vec<String>,
    pub edges: Vec<DependencyEdge>,
    pub resolution_strategy: ResolutionStrategy,
    /// Tables in the order they should be touched to break the cycle.
    pub resolution_order: Vec<String>,
    pub complexity: CycleComplexity,
    /// Edge left unsatisfied on first insert and patched afterwards.
    pub break_edge: Option<DependencyEdge>,
}

impl DependencyCycle {
    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|name| name == table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphComplexity {
    Simple,
    Moderate,
    Complex,
}

/// Totals and diagnostics for a built graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphMetadata {
    pub total_tables: usize,
    pub total_relationships: usize,
    pub circular_dependencies: usize,
    pub max_depth: u32,
    pub complexity: GraphComplexity,
    /// 0.8 for acyclic graphs, lowered by 0.1 per cycle.
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Dependency graph for one schema snapshot. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyGraph {
    pub nodes: Vec<TableNode>,
    pub edges: Vec<DependencyEdge>,
    pub cycles: Vec<DependencyCycle>,
    pub seeding_order: Vec<String>,
    pub creation_order: Vec<String>,
    pub deletion_order: Vec<String>,
    pub metadata: GraphMetadata,
    #[serde(skip)]
    pub(crate) index: BTreeMap<String, usize>,
    #[serde(skip)]
    pub(crate) cycle_index: CycleIndex,
}

impl DependencyGraph {
    pub fn node(&self, table: &str) -> Option<&TableNode> {
        self.index.get(table).map(|idx| &self.nodes[*idx])
    }

    pub fn contains(&self, table: &str) -> bool {
        self.index.contains_key(table)
    }

    /// Outgoing edges of `table`, in registration order.
    pub fn edges_from<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |edge| edge.from == table)
    }

    /// True when both endpoints sit in the same detected cycle.
    pub fn is_cyclic_edge(&self, from: &str, to: &str) -> bool {
        self.cycle_index.contains_edge(from, to)
    }

    pub fn cycles_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a DependencyCycle> {
        self.cycles.iter().filter(move |cycle| cycle.contains(table))
    }

    /// Position of `table` in the seeding order.
    pub fn position(&self, table: &str) -> Option<usize> {
        self.seeding_order.iter().position(|name| name == table)
    }
}

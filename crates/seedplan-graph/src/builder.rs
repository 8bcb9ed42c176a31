use std::collections::BTreeMap;

use tracing::{info, warn};

use seedplan_core::{RelationshipInput, SchemaSnapshot, SizeClass, TableInput, TableMetadata};

use crate::cycles::{CycleIndex, detect_cycles};
use crate::depth::{assign_depths, assign_priorities};
use crate::model::{
    CycleComplexity, DependencyCycle, DependencyEdge, DependencyGraph, GraphComplexity,
    GraphMetadata, NodeMetadata, ResolutionStrategy, SeedingComplexity, TableNode,
};
use crate::order::seeding_order;
use crate::resolution::resolve_cycles;

/// Collects tables and foreign keys, then builds a [`DependencyGraph`].
///
/// The builder is consumed by [`GraphBuilder::build`], so a graph never
/// shares state with another snapshot.
#[derive(Debug, Default, Clone)]
pub struct GraphBuilder {
    tables: Vec<TableInput>,
    relationships: Vec<RelationshipInput>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &SchemaSnapshot) -> Self {
        Self {
            tables: snapshot.tables.clone(),
            relationships: snapshot.relationships.clone(),
        }
    }

    /// Register a table.
    pub fn add_node(
        &mut self,
        table: impl Into<String>,
        schema: impl Into<String>,
        metadata: TableMetadata,
    ) -> &mut Self {
        self.tables.push(TableInput {
            name: table.into(),
            schema: schema.into(),
            metadata,
        });
        self
    }

    /// Record that `relationship.from_table` references `relationship.to_table`.
    ///
    /// Unknown tables are accepted here and reported as warnings by `build`.
    pub fn add_edge(&mut self, relationship: RelationshipInput) -> &mut Self {
        self.relationships.push(relationship);
        self
    }

    pub fn build(self) -> DependencyGraph {
        let mut warnings = Vec::new();
        let mut nodes: Vec<TableNode> = Vec::with_capacity(self.tables.len());
        let mut index: BTreeMap<String, usize> = BTreeMap::new();
        let mut supplied_sizes: Vec<Option<SizeClass>> = Vec::with_capacity(self.tables.len());

        for table in self.tables {
            if index.contains_key(&table.name) {
                warn!(table = %table.name, "duplicate table registration ignored");
                warnings.push(format!("duplicate table {} ignored", table.name));
                continue;
            }
            index.insert(table.name.clone(), nodes.len());
            supplied_sizes.push(table.metadata.estimated_size);
            nodes.push(new_node(table));
        }

        let edges: Vec<DependencyEdge> = self
            .relationships
            .iter()
            .map(DependencyEdge::from_relationship)
            .collect();

        let mut dangling = 0;
        for edge in &edges {
            if let Some(from) = index.get(&edge.from) {
                nodes[*from].metadata.foreign_key_count += 1;
            }

            match (index.get(&edge.from), index.get(&edge.to)) {
                (Some(from), Some(to)) => {
                    if from == to {
                        continue;
                    }
                    push_unique(&mut nodes[*from].dependencies, &edge.to);
                    push_unique(&mut nodes[*to].dependents, &edge.from);
                }
                (from, to) => {
                    dangling += 1;
                    let missing: Vec<&str> = [
                        (from.is_none(), edge.from.as_str()),
                        (to.is_none(), edge.to.as_str()),
                    ]
                    .into_iter()
                    .filter_map(|(is_missing, table)| is_missing.then_some(table))
                    .collect();
                    warn!(
                        constraint = %edge.constraint_name,
                        missing = ?missing,
                        "dangling foreign key reference"
                    );
                    warnings.push(format!(
                        "dangling reference {}: {} -> {} (unknown table {})",
                        edge.constraint_name,
                        edge.from,
                        edge.to,
                        missing.join(", ")
                    ));
                }
            }
        }

        let mut cycles = detect_cycles(&nodes, &index, &edges);
        resolve_cycles(&mut cycles);
        let cycle_index = CycleIndex::new(&cycles);

        for node in nodes.iter_mut() {
            node.is_circular = cycle_index.is_circular(&node.name);
        }
        assign_depths(&mut nodes, &index, &cycle_index);
        assign_priorities(&mut nodes);
        for (node, supplied) in nodes.iter_mut().zip(supplied_sizes) {
            classify_node(node, supplied);
        }

        let order = seeding_order(&nodes, &index, &cycles, &cycle_index);
        warnings.extend(order_conflicts(&edges, &order, &cycle_index));
        let mut deletion_order = order.clone();
        deletion_order.reverse();

        let metadata = graph_metadata(&nodes, &edges, &cycles, dangling, warnings);

        info!(
            tables = metadata.total_tables,
            relationships = metadata.total_relationships,
            cycles = metadata.circular_dependencies,
            max_depth = metadata.max_depth,
            complexity = ?metadata.complexity,
            "dependency graph built"
        );

        DependencyGraph {
            nodes,
            edges,
            cycles,
            creation_order: order.clone(),
            seeding_order: order,
            deletion_order,
            metadata,
            index,
            cycle_index,
        }
    }
}

/// Build the dependency graph for a snapshot.
pub fn build_graph(snapshot: &SchemaSnapshot) -> DependencyGraph {
    GraphBuilder::from_snapshot(snapshot).build()
}

fn new_node(table: TableInput) -> TableNode {
    let TableInput {
        name,
        schema,
        metadata,
    } = table;

    TableNode {
        name,
        schema,
        dependencies: Vec::new(),
        dependents: Vec::new(),
        depth: 0,
        priority: 0,
        is_circular: false,
        metadata: NodeMetadata {
            is_junction_table: metadata.is_junction_table,
            is_tenant_scoped: metadata.is_tenant_scoped,
            has_timestamps: metadata.has_timestamps,
            primary_key: metadata.primary_key,
            foreign_key_count: 0,
            estimated_size: SizeClass::Medium,
            seeding_complexity: SeedingComplexity::Simple,
        },
    }
}

/// Non-cyclic edges whose referencing table is seeded before its target.
///
/// Happens when a loop shares tables with an already reported cycle and the
/// depth-first search does not report it separately.
fn order_conflicts(
    edges: &[DependencyEdge],
    order: &[String],
    cycle_index: &CycleIndex,
) -> Vec<String> {
    let positions: BTreeMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(position, table)| (table.as_str(), position))
        .collect();

    edges
        .iter()
        .filter(|edge| !edge.is_self_reference())
        .filter(|edge| !cycle_index.contains_edge(&edge.from, &edge.to))
        .filter_map(|edge| {
            let from = positions.get(edge.from.as_str())?;
            let to = positions.get(edge.to.as_str())?;
            (from < to).then(|| {
                warn!(
                    constraint = %edge.constraint_name,
                    from = %edge.from,
                    to = %edge.to,
                    "seeding order contradicts foreign key"
                );
                format!(
                    "seeding order places {} before its dependency {} ({})",
                    edge.from, edge.to, edge.constraint_name
                )
            })
        })
        .collect()
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// Derive the size class (unless supplied) and the seeding complexity.
fn classify_node(node: &mut TableNode, supplied: Option<SizeClass>) {
    let fk_count = node.metadata.foreign_key_count;

    node.metadata.estimated_size = supplied.unwrap_or(if node.metadata.is_junction_table {
        SizeClass::Large
    } else if fk_count == 0 {
        SizeClass::Small
    } else {
        SizeClass::Medium
    });

    node.metadata.seeding_complexity = if node.is_circular || fk_count >= 3 {
        SeedingComplexity::Complex
    } else if fk_count > 0 {
        SeedingComplexity::Moderate
    } else {
        SeedingComplexity::Simple
    };
}

fn graph_metadata(
    nodes: &[TableNode],
    edges: &[DependencyEdge],
    cycles: &[DependencyCycle],
    dangling: usize,
    mut warnings: Vec<String>,
) -> GraphMetadata {
    let max_depth = nodes.iter().map(|node| node.depth).max().unwrap_or(0);
    let has_complex_cycle = cycles
        .iter()
        .any(|cycle| cycle.complexity == CycleComplexity::Complex);

    let complexity = if has_complex_cycle || nodes.len() > 50 {
        GraphComplexity::Complex
    } else if !cycles.is_empty() || nodes.len() > 15 || max_depth > 4 {
        GraphComplexity::Moderate
    } else {
        GraphComplexity::Simple
    };

    let confidence = (8_i32 - cycles.len() as i32).max(1) as f64 / 10.0;

    let mut recommendations = Vec::new();
    for cycle in cycles {
        let tables = cycle.tables.join(", ");
        warnings.push(format!("circular dependency between {tables}"));
        recommendations.push(match cycle.resolution_strategy {
            ResolutionStrategy::DeferConstraints => format!(
                "seed {tables} in one transaction with deferred constraints"
            ),
            ResolutionStrategy::NullInitially => {
                let column = cycle
                    .break_edge
                    .as_ref()
                    .map(|edge| format!("{}.{}", edge.from, edge.from_column))
                    .unwrap_or_else(|| "the nullable reference".to_string());
                format!("insert {tables} with {column} null, then backfill it")
            }
            ResolutionStrategy::PostInsertUpdate => format!(
                "insert {tables} with placeholder references and update them once all rows exist"
            ),
            ResolutionStrategy::Manual => {
                format!("resolve the cycle between {tables} manually")
            }
        });
    }

    if dangling > 0 {
        recommendations.push(format!(
            "add the tables behind {dangling} dangling relationships to the snapshot or drop those relationships"
        ));
    }

    for node in nodes {
        if node.metadata.is_junction_table && node.metadata.estimated_size == SizeClass::Large {
            recommendations.push(format!(
                "seed junction table {} in batches after its parents",
                node.name
            ));
        }
    }

    GraphMetadata {
        total_tables: nodes.len(),
        total_relationships: edges.len(),
        circular_dependencies: cycles.len(),
        max_depth,
        complexity,
        confidence,
        warnings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedplan_core::FkAction;

    #[test]
    fn dangling_edges_are_kept_and_reported() {
        let mut builder = GraphBuilder::new();
        builder.add_node("orders", "public", TableMetadata::default());
        builder.add_edge(RelationshipInput::required("orders", "user_id", "users"));
        let graph = builder.build();

        assert_eq!(graph.edges.len(), 1);
        assert!(graph.node("orders").unwrap().dependencies.is_empty());
        assert_eq!(graph.node("orders").unwrap().metadata.foreign_key_count, 1);
        assert_eq!(graph.seeding_order, vec!["orders"]);
        assert!(
            graph
                .metadata
                .warnings
                .iter()
                .any(|warning| warning.contains("dangling reference orders_user_id_fkey"))
        );
        assert!(!graph.metadata.recommendations.is_empty());
    }

    #[test]
    fn duplicate_tables_keep_first_registration() {
        let mut builder = GraphBuilder::new();
        builder.add_node("users", "public", TableMetadata::default());
        builder.add_node("users", "auth", TableMetadata::default());
        let graph = builder.build();

        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.node("users").unwrap().schema, "public");
        assert_eq!(graph.metadata.warnings, vec!["duplicate table users ignored"]);
    }

    #[test]
    fn metadata_classifies_nodes() {
        let mut builder = GraphBuilder::new();
        builder.add_node("users", "public", TableMetadata::default());
        builder.add_node("groups", "public", TableMetadata {
            estimated_size: Some(SizeClass::Large),
            ..TableMetadata::default()
        });
        builder.add_node("user_groups", "public", TableMetadata {
            is_junction_table: true,
            primary_key: vec!["user_id".to_string(), "group_id".to_string()],
            ..TableMetadata::default()
        });
        builder
            .add_edge(
                RelationshipInput::required("user_groups", "user_id", "users")
                    .on_delete(FkAction::Cascade),
            )
            .add_edge(
                RelationshipInput::required("user_groups", "group_id", "groups")
                    .on_delete(FkAction::Cascade),
            );
        let graph = builder.build();

        let users = graph.node("users").unwrap();
        assert_eq!(users.metadata.estimated_size, SizeClass::Small);
        assert_eq!(users.metadata.seeding_complexity, SeedingComplexity::Simple);
        assert_eq!(users.dependents, vec!["user_groups"]);

        let groups = graph.node("groups").unwrap();
        assert_eq!(groups.metadata.estimated_size, SizeClass::Large);

        let junction = graph.node("user_groups").unwrap();
        assert_eq!(junction.metadata.estimated_size, SizeClass::Large);
        assert_eq!(junction.metadata.seeding_complexity, SeedingComplexity::Moderate);
        assert_eq!(junction.dependencies, vec!["users", "groups"]);
        assert!(graph.edges.iter().all(|edge| edge.weight == 10));

        assert_eq!(graph.metadata.complexity, GraphComplexity::Simple);
        assert_eq!(graph.metadata.confidence, 0.8);
        assert!(
            graph
                .metadata
                .recommendations
                .iter()
                .any(|item| item.contains("junction table user_groups"))
        );
    }

    #[test]
    fn loops_through_a_reported_cycle_are_flagged() {
        let mut builder = GraphBuilder::new();
        for table in ["t0", "t1", "t3"] {
            builder.add_node(table, "public", TableMetadata::default());
        }
        builder
            .add_edge(RelationshipInput::required("t0", "t3_id", "t3"))
            .add_edge(RelationshipInput::required("t0", "t1_id", "t1"))
            .add_edge(RelationshipInput::required("t1", "t3_id", "t3"))
            .add_edge(RelationshipInput::required("t3", "t0_id", "t0"));
        let graph = builder.build();

        assert_eq!(graph.cycles.len(), 1);
        assert_eq!(graph.cycles[0].tables, vec!["t0", "t3"]);
        assert_eq!(graph.seeding_order, vec!["t0", "t3", "t1"]);
        assert!(
            graph
                .metadata
                .warnings
                .iter()
                .any(|warning| warning == "seeding order places t0 before its dependency t1 (t0_t1_id_fkey)")
        );
        assert!(
            !graph
                .metadata
                .warnings
                .iter()
                .any(|warning| warning.contains("places t1 before"))
        );
    }

    #[test]
    fn acyclic_orders_raise_no_conflicts() {
        let mut builder = GraphBuilder::new();
        for table in ["tasks", "projects", "users"] {
            builder.add_node(table, "public", TableMetadata::default());
        }
        builder
            .add_edge(RelationshipInput::required("tasks", "project_id", "projects"))
            .add_edge(RelationshipInput::required("projects", "owner_id", "users"));
        let graph = builder.build();

        assert_eq!(graph.seeding_order, vec!["users", "projects", "tasks"]);
        assert!(graph.metadata.warnings.is_empty());
    }

    #[test]
    fn confidence_drops_per_cycle() {
        let mut builder = GraphBuilder::new();
        for table in ["a", "b", "c", "d"] {
            builder.add_node(table, "public", TableMetadata::default());
        }
        builder
            .add_edge(RelationshipInput::required("a", "b_id", "b").nullable())
            .add_edge(RelationshipInput::required("b", "a_id", "a"))
            .add_edge(RelationshipInput::required("c", "d_id", "d").deferrable())
            .add_edge(RelationshipInput::required("d", "c_id", "c").deferrable());
        let graph = builder.build();

        assert_eq!(graph.metadata.circular_dependencies, 2);
        assert_eq!(graph.metadata.confidence, 0.6);
        assert_eq!(graph.metadata.complexity, GraphComplexity::Moderate);
        assert_eq!(graph.cycles[0].resolution_strategy, ResolutionStrategy::NullInitially);
        assert_eq!(graph.cycles[1].resolution_strategy, ResolutionStrategy::DeferConstraints);
        assert!(graph.nodes.iter().all(|node| node.is_circular));
    }
}

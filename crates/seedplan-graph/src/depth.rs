use std::collections::{BTreeMap, VecDeque};

use crate::cycles::CycleIndex;
use crate::model::TableNode;

/// Assign depths breadth-first from tables without dependencies.
///
/// Each dependent gets `max(existing, parent + 1)` and is re-queued only when
/// its depth grows. Edges inside a detected cycle are not followed and depth
/// never exceeds the node count, so cyclic input terminates.
pub fn assign_depths(
    nodes: &mut [TableNode],
    index: &BTreeMap<String, usize>,
    cycles: &CycleIndex,
) {
    let limit = nodes.len() as u32;
    let mut queue: VecDeque<usize> = VecDeque::new();

    for (idx, node) in nodes.iter_mut().enumerate() {
        node.depth = 0;
        let blocking = node
            .dependencies
            .iter()
            .filter(|dependency| !cycles.contains_edge(&node.name, dependency))
            .count();
        if blocking == 0 {
            queue.push_back(idx);
        }
    }

    while let Some(current) = queue.pop_front() {
        let parent_depth = nodes[current].depth;
        let dependents = nodes[current].dependents.clone();

        for dependent in dependents {
            if cycles.contains_edge(&dependent, &nodes[current].name) {
                continue;
            }
            let Some(&child) = index.get(&dependent) else {
                continue;
            };
            let candidate = parent_depth + 1;
            if candidate > nodes[child].depth && candidate <= limit {
                nodes[child].depth = candidate;
                queue.push_back(child);
            }
        }
    }
}

/// `100 - 10 * dependencies - 20 * junction + 10 * tenant`, floored at 0.
pub fn seeding_priority(node: &TableNode) -> u32 {
    let mut priority = 100_i64 - 10 * node.dependencies.len() as i64;
    if node.metadata.is_junction_table {
        priority -= 20;
    }
    if node.metadata.is_tenant_scoped {
        priority += 10;
    }
    priority.max(0) as u32
}

pub fn assign_priorities(nodes: &mut [TableNode]) {
    for node in nodes.iter_mut() {
        node.priority = seeding_priority(node);
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::GraphBuilder;
    use seedplan_core::{RelationshipInput, TableMetadata};

    #[test]
    fn depth_is_longest_path_from_roots() {
        let mut builder = GraphBuilder::new();
        for table in ["users", "teams", "memberships", "audit"] {
            builder.add_node(table, "public", TableMetadata::default());
        }
        builder
            .add_edge(RelationshipInput::required("teams", "owner_id", "users"))
            .add_edge(RelationshipInput::required("memberships", "user_id", "users"))
            .add_edge(RelationshipInput::required("memberships", "team_id", "teams"))
            .add_edge(RelationshipInput::required("audit", "membership_id", "memberships"));
        let graph = builder.build();

        assert_eq!(graph.node("users").unwrap().depth, 0);
        assert_eq!(graph.node("teams").unwrap().depth, 1);
        assert_eq!(graph.node("memberships").unwrap().depth, 2);
        assert_eq!(graph.node("audit").unwrap().depth, 3);
        assert_eq!(graph.metadata.max_depth, 3);
    }

    #[test]
    fn priority_rewards_tenant_scope_and_penalizes_junctions() {
        let mut builder = GraphBuilder::new();
        builder.add_node("accounts", "public", TableMetadata::default());
        builder.add_node("projects", "public", TableMetadata {
            is_tenant_scoped: true,
            ..TableMetadata::default()
        });
        builder.add_node("project_tags", "public", TableMetadata {
            is_junction_table: true,
            ..TableMetadata::default()
        });
        builder.add_node("tags", "public", TableMetadata::default());
        builder
            .add_edge(RelationshipInput::required("projects", "account_id", "accounts"))
            .add_edge(RelationshipInput::required("project_tags", "project_id", "projects"))
            .add_edge(RelationshipInput::required("project_tags", "tag_id", "tags"));
        let graph = builder.build();

        assert_eq!(graph.node("accounts").unwrap().priority, 100);
        assert_eq!(graph.node("projects").unwrap().priority, 100);
        assert_eq!(graph.node("project_tags").unwrap().priority, 60);
    }

    #[test]
    fn priority_floors_at_zero() {
        let mut builder = GraphBuilder::new();
        builder.add_node("hub", "public", TableMetadata {
            is_junction_table: true,
            ..TableMetadata::default()
        });
        for idx in 0..12 {
            let parent = format!("parent_{idx}");
            builder.add_node(parent.clone(), "public", TableMetadata::default());
            builder.add_edge(RelationshipInput::required("hub", format!("{parent}_id"), parent));
        }
        let graph = builder.build();
        assert_eq!(graph.node("hub").unwrap().priority, 0);
    }

    #[test]
    fn cyclic_tables_terminate_with_bounded_depth() {
        let mut builder = GraphBuilder::new();
        for table in ["root", "a", "b"] {
            builder.add_node(table, "public", TableMetadata::default());
        }
        builder
            .add_edge(RelationshipInput::required("a", "root_id", "root"))
            .add_edge(RelationshipInput::required("a", "b_id", "b"))
            .add_edge(RelationshipInput::required("b", "a_id", "a"));
        let graph = builder.build();

        assert_eq!(graph.node("a").unwrap().depth, 1);
        assert_eq!(graph.node("b").unwrap().depth, 0);
    }
}

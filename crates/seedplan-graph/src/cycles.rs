use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::model::{
    CycleComplexity, DependencyCycle, DependencyEdge, ResolutionStrategy, TableNode,
};

/// Table-to-cycle membership used to tell cyclic edges apart.
#[derive(Debug, Clone, Default)]
pub struct CycleIndex {
    membership: BTreeMap<String, BTreeSet<usize>>,
}

impl CycleIndex {
    pub fn new(cycles: &[DependencyCycle]) -> Self {
        let mut membership: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for (idx, cycle) in cycles.iter().enumerate() {
            for table in &cycle.tables {
                membership.entry(table.clone()).or_default().insert(idx);
            }
        }
        Self { membership }
    }

    pub fn is_circular(&self, table: &str) -> bool {
        self.membership.contains_key(table)
    }

    /// True when `from` and `to` share at least one cycle.
    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        match (self.membership.get(from), self.membership.get(to)) {
            (Some(left), Some(right)) => !left.is_disjoint(right),
            _ => false,
        }
    }
}

/// Find circular dependency chains with a depth-first search over node
/// dependencies.
///
/// Cycles come back unresolved (`Manual`, no resolution order); see
/// [`crate::resolution::resolve_cycles`].
pub fn detect_cycles(
    nodes: &[TableNode],
    index: &BTreeMap<String, usize>,
    edges: &[DependencyEdge],
) -> Vec<DependencyCycle> {
    let mut search = CycleSearch {
        nodes,
        index,
        visiting: BTreeSet::new(),
        visited: BTreeSet::new(),
        path: Vec::new(),
        found: Vec::new(),
        seen: BTreeSet::new(),
    };

    for idx in 0..nodes.len() {
        if !search.visited.contains(&idx) {
            search.visit(idx);
        }
    }

    search
        .found
        .into_iter()
        .map(|path| {
            let tables: Vec<String> = path.iter().map(|idx| nodes[*idx].name.clone()).collect();
            let members: BTreeSet<&str> = tables.iter().map(String::as_str).collect();
            let cycle_edges: Vec<DependencyEdge> = edges
                .iter()
                .filter(|edge| {
                    !edge.is_self_reference()
                        && members.contains(edge.from.as_str())
                        && members.contains(edge.to.as_str())
                })
                .cloned()
                .collect();
            debug!(tables = ?tables, edges = cycle_edges.len(), "cycle detected");

            DependencyCycle {
                complexity: if cycle_edges.len() > 2 {
                    CycleComplexity::Complex
                } else {
                    CycleComplexity::Simple
                },
                tables,
                edges: cycle_edges,
                resolution_strategy: ResolutionStrategy::Manual,
                resolution_order: Vec::new(),
                break_edge: None,
            }
        })
        .collect()
}

struct CycleSearch<'a> {
    nodes: &'a [TableNode],
    index: &'a BTreeMap<String, usize>,
    visiting: BTreeSet<usize>,
    visited: BTreeSet<usize>,
    path: Vec<usize>,
    found: Vec<Vec<usize>>,
    seen: BTreeSet<Vec<usize>>,
}

impl CycleSearch<'_> {
    fn visit(&mut self, node: usize) {
        if self.visited.contains(&node) {
            return;
        }

        if self.visiting.contains(&node) {
            if let Some(start) = self.path.iter().position(|idx| *idx == node) {
                let cycle = self.path[start..].to_vec();
                let mut key = cycle.clone();
                key.sort_unstable();
                if cycle.len() >= 2 && self.seen.insert(key) {
                    self.found.push(cycle);
                }
            }
            return;
        }

        self.visiting.insert(node);
        self.path.push(node);

        let nodes = self.nodes;
        for dependency in &nodes[node].dependencies {
            if let Some(next) = self.index.get(dependency) {
                self.visit(*next);
            }
        }

        self.path.pop();
        self.visiting.remove(&node);
        self.visited.insert(node);
    }
}

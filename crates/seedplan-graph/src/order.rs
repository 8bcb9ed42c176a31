use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::cycles::CycleIndex;
use crate::model::{DependencyCycle, DependencyGraph, TableNode};

/// One group of tables whose dependencies are all placed in earlier phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedingPhase {
    /// 1-based phase number.
    pub phase: usize,
    pub tables: Vec<String>,
    /// More than one table; the caller may seed them concurrently.
    pub parallelizable: bool,
    /// The phase was forced to break a dependency deadlock.
    pub forced: bool,
}

/// Seeding order split into advisory phases.
#[derive(Debug, Clone, Serialize)]
pub struct SeedingPlan {
    pub order: Vec<String>,
    pub phases: Vec<SeedingPhase>,
    pub warnings: Vec<String>,
}

/// Topological seeding order with deterministic tie-breaking.
///
/// Tables are ranked non-circular first, then by ascending depth, then by
/// descending priority, then by registration order. Dependencies are
/// visited before dependents, except across edges of a detected cycle, where
/// the cycle's resolution order applies instead.
pub fn seeding_order(
    nodes: &[TableNode],
    index: &BTreeMap<String, usize>,
    cycles: &[DependencyCycle],
    cycle_index: &CycleIndex,
) -> Vec<String> {
    let mut ranked: Vec<usize> = (0..nodes.len()).collect();
    ranked.sort_by_key(|idx| {
        let node = &nodes[*idx];
        (
            node.is_circular,
            node.depth,
            std::cmp::Reverse(node.priority),
            *idx,
        )
    });

    let mut rank = vec![0; nodes.len()];
    for (position, idx) in ranked.iter().enumerate() {
        rank[*idx] = position;
    }

    let mut predecessors: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for cycle in cycles {
        for pair in cycle.resolution_order.windows(2) {
            if let (Some(before), Some(after)) = (index.get(&pair[0]), index.get(&pair[1])) {
                predecessors.entry(*after).or_default().insert(*before);
            }
        }
    }

    let mut planner = OrderPlanner {
        nodes,
        index,
        cycle_index,
        rank,
        predecessors,
        placed: vec![false; nodes.len()],
        order: Vec::with_capacity(nodes.len()),
    };

    for idx in ranked {
        planner.visit(idx);
    }

    planner.order
}

struct OrderPlanner<'a> {
    nodes: &'a [TableNode],
    index: &'a BTreeMap<String, usize>,
    cycle_index: &'a CycleIndex,
    rank: Vec<usize>,
    predecessors: BTreeMap<usize, BTreeSet<usize>>,
    placed: Vec<bool>,
    order: Vec<String>,
}

impl OrderPlanner<'_> {
    fn visit(&mut self, idx: usize) {
        if self.placed[idx] {
            return;
        }
        self.placed[idx] = true;

        let nodes = self.nodes;
        let node = &nodes[idx];
        let mut prerequisites: Vec<usize> = node
            .dependencies
            .iter()
            .filter(|dependency| !self.cycle_index.contains_edge(&node.name, dependency))
            .filter_map(|dependency| self.index.get(dependency).copied())
            .collect();
        if let Some(before) = self.predecessors.get(&idx) {
            prerequisites.extend(before.iter().copied());
        }
        prerequisites.sort_by_key(|prerequisite| self.rank[*prerequisite]);
        prerequisites.dedup();

        for prerequisite in prerequisites {
            self.visit(prerequisite);
        }

        self.order.push(node.name.clone());
    }
}

impl DependencyGraph {
    /// Group the seeding order into phases of mutually independent tables.
    ///
    /// A phase takes every unplaced table whose non-cyclic dependencies are
    /// already placed in earlier phases. When nothing qualifies the remaining
    /// tables are forced into one phase, so the phases always partition the
    /// order.
    pub fn seeding_phases(&self) -> SeedingPlan {
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut remaining: Vec<&str> = self.seeding_order.iter().map(String::as_str).collect();
        let mut phases = Vec::new();
        let mut warnings = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|table| self.dependencies_placed(table, &placed))
                .collect();

            let phase_number = phases.len() + 1;
            let (tables, forced) = if ready.is_empty() {
                let message = format!(
                    "dependency deadlock at phase {phase_number}; forcing {} tables: {}",
                    remaining.len(),
                    remaining.join(", ")
                );
                warn!(phase = phase_number, tables = remaining.len(), "forcing seeding phase");
                warnings.push(message);
                (std::mem::take(&mut remaining), true)
            } else {
                remaining.retain(|table| !ready.contains(table));
                (ready, false)
            };

            placed.extend(tables.iter().copied());
            phases.push(SeedingPhase {
                phase: phase_number,
                parallelizable: tables.len() > 1,
                tables: tables.into_iter().map(str::to_string).collect(),
                forced,
            });
        }

        info!(
            tables = self.seeding_order.len(),
            phases = phases.len(),
            "seeding phases planned"
        );

        SeedingPlan {
            order: self.seeding_order.clone(),
            phases,
            warnings,
        }
    }

    fn dependencies_placed(&self, table: &str, placed: &BTreeSet<&str>) -> bool {
        let Some(node) = self.node(table) else {
            return true;
        };
        node.dependencies
            .iter()
            .filter(|dependency| !self.cycle_index.contains_edge(table, dependency))
            .all(|dependency| placed.contains(dependency.as_str()))
    }
}

use tracing::debug;

use crate::model::{DependencyCycle, DependencyEdge, EdgeType, ResolutionStrategy};

/// Pick a strategy, break edge and resolution order for every cycle.
pub fn resolve_cycles(cycles: &mut [DependencyCycle]) {
    for cycle in cycles.iter_mut() {
        resolve_cycle(cycle);
    }
}

/// Resolve a single cycle in place.
///
/// Strategy precedence: every edge breakable -> defer constraints; any
/// optional edge -> null initially; otherwise post-insert update.
pub fn resolve_cycle(cycle: &mut DependencyCycle) {
    cycle.resolution_strategy = choose_strategy(&cycle.edges);

    match break_position(cycle) {
        Some((position, edge)) => {
            let len = cycle.tables.len();
            cycle.resolution_order = (0..len)
                .map(|step| cycle.tables[(position + len - step) % len].clone())
                .collect();
            cycle.break_edge = Some(edge);
        }
        None => {
            cycle.resolution_order = cycle.tables.clone();
            cycle.break_edge = None;
        }
    }

    debug!(
        tables = ?cycle.tables,
        strategy = ?cycle.resolution_strategy,
        order = ?cycle.resolution_order,
        "cycle resolved"
    );
}

pub fn choose_strategy(edges: &[DependencyEdge]) -> ResolutionStrategy {
    if edges.is_empty() {
        ResolutionStrategy::Manual
    } else if edges.iter().all(|edge| edge.can_be_circular) {
        ResolutionStrategy::DeferConstraints
    } else if edges.iter().any(|edge| edge.edge_type == EdgeType::Optional) {
        ResolutionStrategy::NullInitially
    } else {
        ResolutionStrategy::PostInsertUpdate
    }
}

/// Path position whose outgoing edge breaks the cycle: the lightest
/// breakable edge, or the lightest edge when none can be broken. Ties keep
/// path order.
fn break_position(cycle: &DependencyCycle) -> Option<(usize, DependencyEdge)> {
    let len = cycle.tables.len();
    let mut best: Option<(usize, &DependencyEdge)> = None;

    for position in 0..len {
        let from = &cycle.tables[position];
        let to = &cycle.tables[(position + 1) % len];
        let Some(edge) = cycle
            .edges
            .iter()
            .filter(|edge| &edge.from == from && &edge.to == to)
            .min_by_key(|edge| break_rank(edge))
        else {
            continue;
        };

        let better = match best {
            Some((_, current)) => break_rank(edge) < break_rank(current),
            None => true,
        };
        if better {
            best = Some((position, edge));
        }
    }

    best.map(|(position, edge)| (position, edge.clone()))
}

fn break_rank(edge: &DependencyEdge) -> (bool, u8) {
    (!edge.can_be_circular, edge.weight)
}

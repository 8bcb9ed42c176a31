//! Dependency graph and seeding order planning.
//!
//! Turns a [`seedplan_core::SchemaSnapshot`] into a [`DependencyGraph`]:
//! nodes with depth and priority, detected foreign-key cycles with a chosen
//! resolution strategy, and a deterministic seeding order that always
//! contains every table exactly once.

pub mod builder;
pub mod cycles;
pub mod depth;
pub mod model;
pub mod order;
pub mod resolution;

pub use builder::{GraphBuilder, build_graph};
pub use cycles::CycleIndex;
pub use model::{
    CycleComplexity, DependencyCycle, DependencyEdge, DependencyGraph, EdgeType, GraphComplexity,
    GraphMetadata, NodeMetadata, ResolutionStrategy, SeedingComplexity, TableNode, edge_weight,
};
pub use order::{SeedingPhase, SeedingPlan};

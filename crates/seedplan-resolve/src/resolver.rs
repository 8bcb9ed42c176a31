use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use seedplan_core::{ConstraintKind, RelationshipInput, TableConstraint, TableMetadata};
use seedplan_graph::GraphBuilder;

use crate::executor::{RecordWriter, execute_operations, substitute_placeholders};
use crate::model::{
    DependencyOperation, Record, RecordModification, ResolutionMetrics, ResolutionResult,
    ResolverOptions,
};
use crate::rules::{DependencyRule, RuleInput, RuleOutcome, default_rules};
use crate::scan::{base_table, referenced_tables};

/// Derives the dependency operations needed before a record can be inserted.
#[derive(Debug, Clone)]
pub struct ConstraintDependencyResolver {
    options: ResolverOptions,
    rules: Vec<DependencyRule>,
}

impl Default for ConstraintDependencyResolver {
    fn default() -> Self {
        Self::new(ResolverOptions::default())
    }
}

/// A constraint waiting for its prerequisite tables.
struct Pending<'a> {
    constraint: &'a TableConstraint,
    prerequisites: BTreeSet<String>,
    outcome: RuleOutcome,
}

#[derive(Default)]
struct Collected {
    processed: usize,
    operations: Vec<DependencyOperation>,
    modifications: Vec<RecordModification>,
    warnings: Vec<String>,
    tables: BTreeSet<String>,
}

impl ConstraintDependencyResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self::with_rules(options, default_rules())
    }

    pub fn with_rules(options: ResolverOptions, rules: Vec<DependencyRule>) -> Self {
        Self { options, rules }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    pub fn rules(&self) -> &[DependencyRule] {
        &self.rules
    }

    pub fn resolve(
        &self,
        table: &str,
        record: &Record,
        constraints: &[TableConstraint],
    ) -> ResolutionResult {
        self.resolve_at(table, record, constraints, Utc::now())
    }

    /// Resolve with an explicit clock, used for time-derived defaults.
    pub fn resolve_at(
        &self,
        table: &str,
        record: &Record,
        constraints: &[TableConstraint],
        now: DateTime<Utc>,
    ) -> ResolutionResult {
        let started = Instant::now();
        info!(table, constraints = constraints.len(), "resolving record constraints");

        let own_table = table_key(table);
        let mut ordered: Vec<&TableConstraint> = constraints.iter().collect();
        ordered.sort_by_key(|constraint| Reverse(constraint.priority()));

        let mut resolved = self.initially_resolved(table, record, constraints);
        let mut collected = Collected::default();
        collected.tables.insert(own_table.clone());

        let mut pending: Vec<Pending<'_>> = ordered
            .into_iter()
            .map(|constraint| {
                let input = RuleInput {
                    table,
                    record,
                    constraint,
                    options: &self.options,
                    now,
                };
                self.pending(&input, &own_table)
            })
            .collect();

        let mut passes = 0;
        while !pending.is_empty() {
            if passes >= self.options.max_resolution_depth {
                warn!(table, pending = pending.len(), "maximum resolution depth reached");
                collected.warnings.push(format!(
                    "maximum resolution depth {} reached with {} constraints pending",
                    self.options.max_resolution_depth,
                    pending.len()
                ));
                break;
            }
            passes += 1;

            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|item| item.prerequisites.is_subset(&resolved));
            pending = waiting;
            if ready.is_empty() {
                break;
            }
            for item in ready {
                accept(item, &mut resolved, &mut collected);
            }
        }

        for item in pending {
            let missing: Vec<&str> = item
                .prerequisites
                .difference(&resolved)
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                accept(item, &mut resolved, &mut collected);
            } else if self.options.strict_mode {
                warn!(constraint = %item.constraint.name, missing = ?missing, "constraint skipped");
                collected.warnings.push(format!(
                    "skipped {}: unresolved dependencies {}",
                    item.constraint.name,
                    missing.join(", ")
                ));
                collected.tables.extend(item.prerequisites);
            } else {
                collected.warnings.push(format!(
                    "processed {} with unresolved dependencies {}",
                    item.constraint.name,
                    missing.join(", ")
                ));
                accept(item, &mut resolved, &mut collected);
            }
        }

        let mut operations = dedupe_operations(collected.operations);
        normalize_priorities(&mut operations);
        let operations = order_operations(operations);
        let modifications = dedupe_modifications(collected.modifications);

        info!(
            table,
            operations = operations.len(),
            modifications = modifications.len(),
            warnings = collected.warnings.len(),
            "record constraints resolved"
        );

        ResolutionResult {
            constraints_resolved: collected.processed,
            operations,
            modifications,
            warnings: collected.warnings,
            errors: Vec::new(),
            execution: None,
            metrics: ResolutionMetrics {
                elapsed_ms: elapsed_ms(started),
                tables_analyzed: collected.tables.len(),
                constraints_processed: constraints.len(),
                dependencies_created: 0,
            },
        }
    }

    /// Resolve, then apply the operations through `writer`.
    ///
    /// Execution is best-effort: failures land in `errors` and in the
    /// execution report while the remaining operations still run.
    /// Modifications pointing at created records get the real values; those
    /// pointing at failed operations keep their placeholders.
    pub fn resolve_and_execute(
        &self,
        table: &str,
        record: &Record,
        constraints: &[TableConstraint],
        writer: &mut dyn RecordWriter,
    ) -> ResolutionResult {
        let started = Instant::now();
        let mut result = self.resolve(table, record, constraints);
        let report = execute_operations(&result.operations, table, record, writer);

        result.errors.extend(report.failed.iter().map(|failed| {
            format!("{} {}: {}", failed.kind.as_str(), failed.table, failed.error)
        }));
        for modification in &mut result.modifications {
            if let Ok(value) = substitute_placeholders(&modification.new_value, &report.created) {
                modification.new_value = value;
            }
        }
        result.metrics.dependencies_created = report.succeeded.len();
        result.metrics.elapsed_ms = elapsed_ms(started);
        if !report.is_complete() {
            warn!(table, failed = report.failed.len(), "dependency execution incomplete");
        }
        result.execution = Some(report);
        result
    }

    /// Tables treated as satisfied before any constraint runs.
    fn initially_resolved(
        &self,
        table: &str,
        record: &Record,
        constraints: &[TableConstraint],
    ) -> BTreeSet<String> {
        let mut resolved: BTreeSet<String> = self
            .options
            .existing_tables
            .iter()
            .map(|name| table_key(name))
            .collect();
        resolved.insert(table_key(table));

        for constraint in constraints {
            if constraint.kind != ConstraintKind::ForeignKey || constraint.columns.is_empty() {
                continue;
            }
            let referenced = constraint
                .columns
                .iter()
                .all(|column| record.get(column).is_some_and(|value| !value.is_null()));
            if let (true, Some(target)) = (referenced, constraint.referenced_table.as_deref()) {
                resolved.insert(table_key(target));
            }
        }
        resolved
    }

    fn pending<'a>(&self, input: &RuleInput<'a>, own_table: &str) -> Pending<'a> {
        let constraint = input.constraint;
        let mut dependencies = BTreeSet::new();
        if constraint.kind == ConstraintKind::ForeignKey {
            if let Some(target) = &constraint.referenced_table {
                dependencies.insert(table_key(target));
            }
        }
        if let Some(expression) = &constraint.expression {
            dependencies.extend(referenced_tables(
                expression,
                input.table,
                &self.options.known_tables,
            ));
        }

        let mut outcome = RuleOutcome::default();
        for rule in self.rules.iter().filter(|rule| (rule.applies)(input)) {
            debug!(constraint = %constraint.name, rule = rule.name, "rule matched");
            dependencies.extend((rule.requires)(input).iter().map(|name| table_key(name)));
            let produced = rule.apply(input);
            outcome.operations.extend(produced.operations);
            outcome.modifications.extend(produced.modifications);
            outcome.warnings.extend(produced.warnings);
        }

        // Tables the constraint creates itself do not gate it.
        let provided: BTreeSet<String> = outcome
            .operations
            .iter()
            .map(|operation| table_key(&operation.table))
            .collect();
        let prerequisites = dependencies
            .into_iter()
            .filter(|name| name != own_table && !provided.contains(name))
            .collect();

        Pending {
            constraint: input.constraint,
            prerequisites,
            outcome,
        }
    }
}

fn accept(item: Pending<'_>, resolved: &mut BTreeSet<String>, collected: &mut Collected) {
    debug!(
        constraint = %item.constraint.name,
        kind = item.constraint.kind.as_str(),
        operations = item.outcome.operations.len(),
        "constraint processed"
    );
    collected.processed += 1;
    for operation in &item.outcome.operations {
        let target = table_key(&operation.table);
        resolved.insert(target.clone());
        collected.tables.insert(target);
    }
    collected.tables.extend(item.prerequisites);
    collected.operations.extend(item.outcome.operations);
    collected.modifications.extend(item.outcome.modifications);
    collected.warnings.extend(item.outcome.warnings);
}

fn table_key(name: &str) -> String {
    base_table(name).to_lowercase()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// One operation per (kind, table); later duplicates only add dependencies.
fn dedupe_operations(operations: Vec<DependencyOperation>) -> Vec<DependencyOperation> {
    let mut kept: Vec<DependencyOperation> = Vec::with_capacity(operations.len());
    for operation in operations {
        let existing = kept.iter_mut().find(|kept| {
            kept.kind == operation.kind && table_key(&kept.table) == table_key(&operation.table)
        });
        match existing {
            Some(existing) => {
                for dependency in operation.depends_on {
                    if !existing.depends_on.contains(&dependency) {
                        existing.depends_on.push(dependency);
                    }
                }
            }
            None => kept.push(operation),
        }
    }
    kept
}

fn dedupe_modifications(modifications: Vec<RecordModification>) -> Vec<RecordModification> {
    let mut seen = BTreeSet::new();
    modifications
        .into_iter()
        .filter(|modification| {
            seen.insert((table_key(&modification.table), modification.field.clone()))
        })
        .collect()
}

/// Raise priorities until every operation sorts after the ones it depends on.
fn normalize_priorities(operations: &mut [DependencyOperation]) {
    for _ in 0..=operations.len() {
        let mut changed = false;
        for idx in 0..operations.len() {
            let floor = {
                let operation = &operations[idx];
                operation
                    .depends_on
                    .iter()
                    .filter_map(|dependency| {
                        operations
                            .iter()
                            .enumerate()
                            .filter(|(other, candidate)| {
                                *other != idx
                                    && table_key(&candidate.table) == table_key(dependency)
                            })
                            .map(|(_, candidate)| candidate.priority)
                            .max()
                    })
                    .max()
            };
            if let Some(floor) = floor {
                if operations[idx].priority <= floor {
                    operations[idx].priority = floor + 1;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Sort by priority, breaking ties with the seeding order of the targets.
fn order_operations(operations: Vec<DependencyOperation>) -> Vec<DependencyOperation> {
    let positions = seeding_positions(&operations);
    let mut indexed: Vec<(usize, DependencyOperation)> = operations.into_iter().enumerate().collect();
    indexed.sort_by_key(|(idx, operation)| {
        (
            operation.priority,
            positions
                .get(&table_key(&operation.table))
                .copied()
                .unwrap_or(usize::MAX),
            *idx,
        )
    });
    indexed.into_iter().map(|(_, operation)| operation).collect()
}

fn seeding_positions(operations: &[DependencyOperation]) -> BTreeMap<String, usize> {
    let targets: BTreeSet<String> = operations
        .iter()
        .map(|operation| table_key(&operation.table))
        .collect();
    let mut builder = GraphBuilder::new();
    let mut registered = BTreeSet::new();
    for operation in operations {
        let target = table_key(&operation.table);
        if registered.insert(target.clone()) {
            builder.add_node(target, "public", TableMetadata::default());
        }
    }
    for operation in operations {
        let target = table_key(&operation.table);
        for dependency in &operation.depends_on {
            let dependency = table_key(dependency);
            if dependency != target && targets.contains(&dependency) {
                builder.add_edge(RelationshipInput::required(
                    target.clone(),
                    format!("{dependency}_id"),
                    dependency,
                ));
            }
        }
    }

    builder
        .build()
        .seeding_order
        .into_iter()
        .enumerate()
        .map(|(position, table)| (table, position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKind;
    use serde_json::{Value, json};

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("record object")
    }

    fn operation(table: &str, priority: u32) -> DependencyOperation {
        DependencyOperation::new(OperationKind::Create, table, Record::new(), "test", priority)
    }

    #[test]
    fn constraints_run_in_priority_order_once_prerequisites_resolve() {
        let resolver = ConstraintDependencyResolver::default();
        let constraints = vec![
            TableConstraint::check(
                "projects_org_active",
                "organization_id IN (SELECT id FROM organizations WHERE active)",
            ),
            TableConstraint::foreign_key("projects_org_fk", &["organization_id"], "organizations"),
        ];
        let result = resolver.resolve("projects", &record(json!({"title": "Launch"})), &constraints);

        assert_eq!(result.constraints_resolved, 2);
        assert_eq!(result.metrics.constraints_processed, 2);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.operations.len(), 1);
        assert_eq!(result.operations[0].table, "organizations");
        assert_eq!(result.metrics.tables_analyzed, 2);
    }

    #[test]
    fn strict_mode_skips_unresolvable_constraints() {
        let constraints = vec![TableConstraint::check(
            "projects_billing_enabled",
            "EXISTS (SELECT 1 FROM billing_accounts b WHERE b.enabled)",
        )];
        let data = record(json!({"title": "Launch"}));

        let lenient = ConstraintDependencyResolver::default().resolve("projects", &data, &constraints);
        assert_eq!(lenient.constraints_resolved, 1);
        assert_eq!(
            lenient.warnings,
            vec!["processed projects_billing_enabled with unresolved dependencies billing_accounts"]
        );

        let strict = ConstraintDependencyResolver::new(ResolverOptions {
            strict_mode: true,
            ..ResolverOptions::default()
        })
        .resolve("projects", &data, &constraints);
        assert_eq!(strict.constraints_resolved, 0);
        assert_eq!(strict.metrics.constraints_processed, 1);
        assert_eq!(
            strict.warnings,
            vec!["skipped projects_billing_enabled: unresolved dependencies billing_accounts"]
        );
    }

    #[test]
    fn existing_tables_and_present_references_count_as_resolved() {
        let constraints = vec![
            TableConstraint::foreign_key("tasks_project_fk", &["project_id"], "projects"),
            TableConstraint::check(
                "tasks_project_open",
                "project_id IN (SELECT id FROM projects WHERE NOT archived) AND assignee IN (SELECT id FROM users)",
            ),
        ];
        let resolver = ConstraintDependencyResolver::new(ResolverOptions {
            strict_mode: true,
            existing_tables: vec!["public.users".to_string()],
            ..ResolverOptions::default()
        });
        let result = resolver.resolve("tasks", &record(json!({"project_id": "p-1"})), &constraints);

        assert_eq!(result.constraints_resolved, 2);
        assert!(result.operations.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn zero_depth_falls_back_to_stuck_handling() {
        let resolver = ConstraintDependencyResolver::new(ResolverOptions {
            max_resolution_depth: 0,
            ..ResolverOptions::default()
        });
        let constraints = vec![TableConstraint::foreign_key(
            "projects_org_fk",
            &["organization_id"],
            "organizations",
        )];
        let result = resolver.resolve("projects", &Record::new(), &constraints);

        assert_eq!(result.constraints_resolved, 1);
        assert_eq!(result.operations.len(), 1);
        assert!(result.warnings[0].starts_with("maximum resolution depth 0 reached"));
    }

    #[test]
    fn duplicate_operations_collapse() {
        let operations = vec![
            operation("organizations", 10),
            operation("organizations", 30).depends_on("users"),
            operation("users", 10),
        ];
        let deduped = dedupe_operations(operations);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].priority, 10);
        assert_eq!(deduped[0].depends_on, vec!["users"]);
    }

    #[test]
    fn priorities_rise_above_dependencies() {
        let mut operations = vec![
            operation("organization_members", 5).depends_on("organizations"),
            operation("organizations", 10).depends_on("users"),
            operation("users", 40),
        ];
        normalize_priorities(&mut operations);
        assert_eq!(operations[2].priority, 40);
        assert_eq!(operations[1].priority, 41);
        assert_eq!(operations[0].priority, 42);

        let ordered = order_operations(operations);
        let tables: Vec<&str> = ordered.iter().map(|op| op.table.as_str()).collect();
        assert_eq!(tables, vec!["users", "organizations", "organization_members"]);
    }

    #[test]
    fn equal_priorities_follow_seeding_order() {
        let operations = vec![
            operation("profiles", 10).depends_on("users"),
            operation("users", 10),
        ];
        let ordered = order_operations(operations);
        assert_eq!(ordered[0].table, "users");
        assert_eq!(ordered[1].table, "profiles");
    }
}

mod config;
mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use config::{LogFormat, load_settings};
use logging::init_logging;
use seedplan_core::{
    Error as CoreError, SchemaSnapshot, TableConstraint, ValidationReport, snapshot_json_schema,
    validate_snapshot, validate_snapshot_json,
};
use seedplan_graph::{DependencyGraph, SeedingPlan, build_graph};
use seedplan_resolve::{ConstraintDependencyResolver, InMemoryRecordWriter, Record, ResolverOptions};

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("logging error: {0}")]
    Logging(String),
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    graph: &'a DependencyGraph,
    #[serde(skip_serializing_if = "Option::is_none")]
    phases: Option<SeedingPlan>,
}

#[derive(Parser, Debug)]
#[command(name = "seedplan", version, about = "Plan the order in which to seed a relational schema")]
struct Cli {
    /// Settings file (defaults to ./seedplan.toml when present).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log output format; overrides the settings file.
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
    /// Log filter directive such as `debug` or `seedplan_graph=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the dependency graph and seeding order of a schema snapshot.
    Plan(PlanArgs),
    /// Check a schema snapshot against the JSON Schema and semantic rules.
    Validate(ValidateArgs),
    /// Print the JSON Schema of snapshot documents.
    JsonSchema,
    /// Resolve the dependencies of one record.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Schema snapshot JSON file.
    snapshot: PathBuf,
    /// Include parallelizable seeding phases.
    #[arg(long, default_value_t = false)]
    phases: bool,
    /// Write the plan here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Schema snapshot JSON file.
    snapshot: PathBuf,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Table the record is inserted into.
    #[arg(long)]
    table: String,
    /// Record JSON object file.
    #[arg(long, value_name = "FILE")]
    record: PathBuf,
    /// JSON array of table constraints.
    #[arg(long, value_name = "FILE")]
    constraints: PathBuf,
    /// Apply operations against an in-memory writer (dry run).
    #[arg(long, default_value_t = false)]
    execute: bool,
    /// Skip constraints whose dependencies stay unresolved.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    let format = cli.log_format.unwrap_or(settings.logging.format);
    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_logging(format, level)?;

    match cli.command {
        Command::Plan(args) => run_plan(args),
        Command::Validate(args) => run_validate(args),
        Command::JsonSchema => emit(&snapshot_json_schema()?, None),
        Command::Resolve(args) => run_resolve(args, settings.resolver),
    }
}

fn run_plan(args: PlanArgs) -> Result<(), CliError> {
    let timer = Instant::now();
    let (snapshot, report) = read_snapshot(&args.snapshot)?;
    let Some(snapshot) = snapshot.filter(|_| report.is_ok()) else {
        return Err(invalid_snapshot(&args.snapshot, &report));
    };

    let graph = build_graph(&snapshot);
    let output = PlanOutput {
        graph: &graph,
        phases: args.phases.then(|| graph.seeding_phases()),
    };
    emit(&output, args.out.as_deref())?;

    tracing::info!(
        event = "plan_finished",
        tables = graph.metadata.total_tables,
        cycles = graph.metadata.circular_dependencies,
        duration_ms = timer.elapsed().as_millis() as u64
    );
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    let (_, report) = read_snapshot(&args.snapshot)?;
    emit(&report, None)?;
    if report.is_ok() {
        Ok(())
    } else {
        Err(invalid_snapshot(&args.snapshot, &report))
    }
}

fn run_resolve(args: ResolveArgs, mut options: ResolverOptions) -> Result<(), CliError> {
    let record: Record = serde_json::from_str(&fs::read_to_string(&args.record)?)?;
    let constraints: Vec<TableConstraint> =
        serde_json::from_str(&fs::read_to_string(&args.constraints)?)?;
    if args.strict {
        options.strict_mode = true;
    }

    let resolver = ConstraintDependencyResolver::new(options);
    let result = if args.execute {
        let mut writer = InMemoryRecordWriter::new();
        resolver.resolve_and_execute(&args.table, &record, &constraints, &mut writer)
    } else {
        resolver.resolve(&args.table, &record, &constraints)
    };
    emit(&result, None)
}

/// Parse a snapshot file, running structural then semantic validation.
///
/// The snapshot is `None` when the document fails the JSON Schema.
fn read_snapshot(path: &Path) -> Result<(Option<SchemaSnapshot>, ValidationReport), CliError> {
    let raw: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let mut report = validate_snapshot_json(&raw)?;
    if !report.is_ok() {
        return Ok((None, report));
    }

    let snapshot: SchemaSnapshot = serde_json::from_value(raw)?;
    report.merge(validate_snapshot(&snapshot));
    for warning in &report.warnings {
        tracing::warn!(code = %warning.code, path = %warning.path, "{}", warning.message);
    }
    Ok((Some(snapshot), report))
}

fn invalid_snapshot(path: &Path, report: &ValidationReport) -> CliError {
    let details: Vec<String> = report
        .errors
        .iter()
        .map(|issue| format!("{} at {}: {}", issue.code, issue.path, issue.message))
        .collect();
    CliError::InvalidInput(format!(
        "{} is not a valid snapshot: {}",
        path.display(),
        details.join("; ")
    ))
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<(), CliError> {
    let encoded = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            fs::write(path, encoded)?;
            tracing::info!(event = "output_written", path = %path.display());
        }
        None => println!("{encoded}"),
    }
    Ok(())
}

mod scenario;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use timeline_core::{
    CompanyListing, CsvOptions, DataSet, ListingDate, MetaData, PriorityMerge, Provenance, Record,
    TimelineError,
};
use tracing_subscriber::EnvFilter;

use crate::scenario::{ListingBuilder, ListingLedger, Scenario};

const CLI_CONTRACT_VERSION: &str = "timeline.v1";

#[derive(Debug, Parser)]
#[command(name = "tl")]
#[command(about = "Listing timeline reconstruction CLI")]
struct Cli {
    /// Fallback log filter when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconstruct a ledger from a scenario file.
    Build(BuildArgs),
    /// Reconstruct a ledger and report the record in force at a date.
    At(AtArgs),
    /// Reconstruct two ledgers and priority-merge them.
    Merge(MergeArgs),
    /// Report which updates of a scenario are already reflected in another.
    Audit(AuditArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BuildMode {
    Forward,
    Reverse,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Debug, Args)]
struct BuildArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, value_enum, default_value_t = BuildMode::Bidirectional)]
    mode: BuildMode,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct AtArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, value_enum, default_value_t = BuildMode::Bidirectional)]
    mode: BuildMode,
    #[arg(long)]
    date: String,
}

#[derive(Debug, Args)]
struct MergeArgs {
    #[arg(long)]
    high: PathBuf,
    #[arg(long)]
    low: PathBuf,
    #[arg(long, value_enum, default_value_t = BuildMode::Bidirectional)]
    mode: BuildMode,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct AuditArgs {
    /// Scenario whose updates are audited.
    #[arg(long = "in")]
    input: PathBuf,
    /// Scenario whose reconstructed ledger is audited against.
    #[arg(long)]
    against: PathBuf,
    #[arg(long, value_enum, default_value_t = BuildMode::Bidirectional)]
    mode: BuildMode,
}

/// Reconstructed ledger plus what the build reported.
struct BuildSummary {
    ledger: ListingLedger,
    duplicates: usize,
    applied: usize,
    validated: usize,
    conflicts: usize,
    failures: Vec<TimelineError>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        Command::Build(args) => run_build(&args),
        Command::At(args) => run_at(&args),
        Command::Merge(args) => run_merge(&args),
        Command::Audit(args) => run_audit(&args),
    }
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn run_build(args: &BuildArgs) -> Result<()> {
    let scenario = Scenario::load(&args.input)?;
    let summary = build_scenario(&scenario, args.mode)?;
    match args.format {
        OutputFormat::Csv => {
            print!("{}", summary.ledger.to_csv(&CsvOptions::default()));
            Ok(())
        }
        OutputFormat::Json => emit_json(serde_json::json!({
            "mode": mode_name(args.mode),
            "duplicates": summary.duplicates,
            "applied": summary.applied,
            "validated": summary.validated,
            "conflicts": summary.conflicts,
            "failures": summary.failures.iter().map(failure_json).collect::<Vec<_>>(),
            "fingerprint": summary.ledger.fingerprint(),
            "entries": ledger_json(&summary.ledger),
        })),
    }
}

fn run_at(args: &AtArgs) -> Result<()> {
    let date = parse_listing_date(&args.date)?;
    let scenario = Scenario::load(&args.input)?;
    let summary = build_scenario(&scenario, args.mode)?;
    let found = summary.ledger.entry_at(&date);
    emit_json(serde_json::json!({
        "as_of": date.to_iso(),
        "found": found.is_some(),
        "effective_date": found.map(|(effective, _)| effective.to_iso()),
        "entry": found.map(|(effective, dataset)| entry_json(effective, dataset)),
    }))
}

fn run_merge(args: &MergeArgs) -> Result<()> {
    let high = build_scenario(&Scenario::load(&args.high)?, args.mode)?;
    let low = build_scenario(&Scenario::load(&args.low)?, args.mode)?;
    let merged = PriorityMerge::new(&high.ledger, &low.ledger)
        .merge_result()
        .context("priority merge failed")?;

    match args.format {
        OutputFormat::Csv => {
            print!("{}", merged.to_csv(&CsvOptions::default()));
            Ok(())
        }
        OutputFormat::Json => emit_json(serde_json::json!({
            "high_entries": high.ledger.len(),
            "low_entries": low.ledger.len(),
            "fingerprint": merged.fingerprint(),
            "entries": ledger_json(&merged),
        })),
    }
}

fn run_audit(args: &AuditArgs) -> Result<()> {
    let reference = build_scenario(&Scenario::load(&args.against)?, args.mode)?;
    let scenario = Scenario::load(&args.input)?;
    let mut builder = ListingBuilder::new();
    scenario.load_builder(&mut builder)?;

    let report = builder.remove_historical_delta_version_artifacts(&reference.ledger);
    emit_json(serde_json::json!({
        "existing_dates": report.existing_dates.iter().map(|date| date.to_iso()).collect::<Vec<_>>(),
        "mismatched_dates": report.mismatched_dates.iter().map(|date| date.to_iso()).collect::<Vec<_>>(),
        "remaining_dates": builder.pending_dates().iter().map(|date| date.to_iso()).collect::<Vec<_>>(),
    }))
}

fn build_scenario(scenario: &Scenario, mode: BuildMode) -> Result<BuildSummary> {
    let mut builder = ListingBuilder::new();
    let duplicates = scenario.load_builder(&mut builder)?;
    let reset = Provenance::default();
    let anchors = scenario.sorted_anchors();

    let mut summary = BuildSummary {
        ledger: ListingLedger::new(),
        duplicates,
        applied: 0,
        validated: 0,
        conflicts: 0,
        failures: Vec::new(),
    };
    let pending = builder.pending_len();

    match mode {
        BuildMode::Forward => {
            let Some(start) = anchors.first() else {
                return Err(anyhow!("forward build needs at least one anchor"));
            };
            builder
                .build_forward_timeline(
                    &mut summary.ledger,
                    start.date,
                    scenario.anchor_dataset(start),
                    &reset,
                )
                .context("forward build failed")?;
            reconcile_anchors(scenario, &mut summary.ledger)?;
            summary.applied = pending;
            summary.validated = pending;
        }
        BuildMode::Reverse => {
            let Some(end) = anchors.last() else {
                return Err(anyhow!("reverse build needs at least one anchor"));
            };
            let Some(origin) = scenario.origin else {
                return Err(anyhow!("reverse build needs an origin date"));
            };
            builder
                .build_reverse_timeline(
                    &mut summary.ledger,
                    origin,
                    end.date,
                    scenario.anchor_dataset(end),
                    &reset,
                )
                .context("reverse build failed")?;
            reconcile_anchors(scenario, &mut summary.ledger)?;
            summary.applied = pending;
            summary.validated = pending;
        }
        BuildMode::Bidirectional => {
            summary.ledger = scenario.anchor_ledger()?;
            let dates = anchors.iter().map(|anchor| anchor.date).collect::<Vec<_>>();
            let outcome = builder
                .build_bidirectional_timeline(&dates, &mut summary.ledger, scenario.origin, &reset)
                .context("bidirectional build failed")?;
            summary.applied = outcome.applied;
            summary.validated = outcome.validated;
            summary.conflicts = outcome.conflicts;
            summary.failures = outcome.failures;
        }
    }

    tracing::info!(
        mode = mode_name(mode),
        entries = summary.ledger.len(),
        applied = summary.applied,
        conflicts = summary.conflicts,
        "scenario built"
    );
    Ok(summary)
}

/// Anchors a single-direction walk did not start from must agree with the
/// rebuilt record in force at their date; they are then kept as entries.
fn reconcile_anchors(scenario: &Scenario, ledger: &mut ListingLedger) -> Result<()> {
    for anchor in scenario.sorted_anchors() {
        let dataset = scenario.anchor_dataset(anchor);
        if let Some(rebuilt) = ledger.version_at(&anchor.date) {
            if rebuilt != &dataset {
                return Err(anyhow!(
                    "anchor at {} holds [{}] but the rebuilt timeline holds [{}]",
                    anchor.date,
                    dataset.record().render(','),
                    rebuilt.record().render(',')
                ));
            }
        }
        ledger
            .insert_version(anchor.date, dataset)
            .with_context(|| format!("anchor at {} conflicts with the rebuilt timeline", anchor.date))?;
    }
    Ok(())
}

fn ledger_json(ledger: &ListingLedger) -> Vec<Value> {
    ledger.iter().map(|(date, dataset)| entry_json(date, dataset)).collect()
}

fn entry_json(date: &ListingDate, dataset: &DataSet<CompanyListing, Provenance>) -> Value {
    let mut fields = Map::new();
    for (index, name) in CompanyListing::FIELD_NAMES.iter().enumerate() {
        fields.insert((*name).to_string(), Value::String(dataset.record().field_text(index)));
    }
    serde_json::json!({
        "date": date.to_iso(),
        "provenance": dataset.metadata().render(),
        "fields": fields,
    })
}

fn failure_json(err: &TimelineError) -> Value {
    serde_json::json!({
        "kind": err.kind().as_str(),
        "message": err.to_string(),
    })
}

fn mode_name(mode: BuildMode) -> &'static str {
    match mode {
        BuildMode::Forward => "forward",
        BuildMode::Reverse => "reverse",
        BuildMode::Bidirectional => "bidirectional",
    }
}

fn parse_listing_date(value: &str) -> Result<ListingDate> {
    value.parse::<ListingDate>().map_err(|err| anyhow!(err))
}

//! Command-line interface for hearth.
//!
//! Provides commands for submitting events, inspecting runs, resuming runs
//! left unfinished, and looking at records and usage counters.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::Adapters;
use crate::config::{self, Settings};
use crate::core::{Dispatcher, Executor, Store, SubmitError};
use crate::domain::{Event, EventName, PropertyRecord, Run, RunStatus};
use crate::workflows;

/// hearth - Event-driven property enrichment pipeline
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit an event and run its workflow
    Submit {
        /// Event name (e.g. enrich-record, add-generation)
        event: String,

        /// Event data as a JSON object (reads from stdin if not provided)
        #[arg(short, long)]
        data: Option<String>,

        /// Only record the run; execute it later with `hearth resume`
        #[arg(long)]
        no_wait: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (e.g. enrich-record:3f2a9c0d1e4b5a67)
        run_id: String,

        /// Also print the run journal
        #[arg(short, long)]
        journal: bool,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Only show runs in this state
        #[arg(short, long, value_enum)]
        status: Option<StatusFilter>,
    },

    /// Execute every run left running (after a crash or `submit --no-wait`)
    Resume,

    /// Show a stored property record
    Record {
        /// Record ID
        record_id: String,
    },

    /// Seed property records from a JSON file (one object or an array)
    Import {
        /// JSON file to import
        file: PathBuf,
    },

    /// Show usage counters of an owner
    Usage {
        /// Owner ID
        owner_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Run states for filtering
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Running,
    Completed,
    Failed,
}

impl From<StatusFilter> for RunStatus {
    fn from(s: StatusFilter) -> Self {
        match s {
            StatusFilter::Running => RunStatus::Running,
            StatusFilter::Completed => RunStatus::Completed,
            StatusFilter::Failed => RunStatus::Failed,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                event,
                data,
                no_wait,
            } => submit_event(&event, data, no_wait).await,
            Commands::Status { run_id, journal } => show_status(&run_id, journal),
            Commands::Runs { limit, status } => list_runs(limit, status.map(RunStatus::from)),
            Commands::Resume => resume_runs().await,
            Commands::Record { record_id } => show_record(&record_id),
            Commands::Import { file } => import_records(&file),
            Commands::Usage { owner_id } => show_usage(&owner_id),
            Commands::Config => show_config(),
        }
    }
}

fn open_store(settings: &Settings) -> Result<Arc<Store>> {
    Ok(Arc::new(Store::open(&settings.database)?))
}

/// Wire store, adapters, workflows and workers together
fn start_dispatcher(settings: &Settings) -> Result<Dispatcher> {
    let store = open_store(settings)?;
    let adapters = Adapters::from_settings(&settings.http, &settings.enrichment)?;
    let registry = Arc::new(workflows::registry(&adapters, &settings.enrichment));
    let executor = Arc::new(Executor::new(store, registry, settings.retry.clone()));

    Ok(Dispatcher::start(executor, settings.workers))
}

/// Submit one event
async fn submit_event(name: &str, data: Option<String>, no_wait: bool) -> Result<()> {
    let settings = config::config()?;

    let payload = match data {
        Some(data) => data,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read event data from stdin")?;
            buffer
        }
    };

    let name: EventName = name.parse()?;
    let event = Event::from_json(name, &payload)?;
    let dispatcher = start_dispatcher(settings)?;

    if no_wait {
        let (run, created) = dispatcher.accept(&event).map_err(submit_error)?;
        eprintln!(
            "[Run {} {}; execute it with `hearth resume`]",
            run.id,
            if created { "recorded" } else { "already exists" }
        );
        dispatcher.shutdown().await;
        return Ok(());
    }

    let handle = dispatcher.submit(event).map_err(submit_error)?;
    if !handle.is_new() {
        eprintln!("[Event already delivered; resolved to run {}]", handle.run_id());
    }

    let run_id = handle.run_id().to_string();
    let waited = handle.wait().await;
    let store = Arc::clone(dispatcher.executor().store());
    dispatcher.shutdown().await;
    waited?;

    let run = store
        .get_run(&run_id)?
        .with_context(|| format!("Run not found: {}", run_id))?;
    report(&run);
    Ok(())
}

fn submit_error(err: SubmitError) -> anyhow::Error {
    match err {
        SubmitError::Invalid(e) => anyhow::anyhow!("Event rejected: {}", e),
        SubmitError::Internal(e) => e,
    }
}

/// Print the outcome of a run, exiting non-zero if it failed
fn report(run: &Run) {
    match run.status {
        RunStatus::Completed => {
            eprintln!("\n[Run {} completed successfully]", run.id);
        }
        RunStatus::Failed => {
            eprintln!(
                "\n[Run {} failed at step '{}': {}]",
                run.id,
                run.failed_step.as_deref().unwrap_or("?"),
                run.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        RunStatus::Running => {
            eprintln!("\n[Run {} is still running]", run.id);
        }
    }
}

/// Show run status
fn show_status(run_id: &str, journal: bool) -> Result<()> {
    let settings = config::config()?;
    let store = open_store(settings)?;

    let run = store
        .get_run(run_id)?
        .with_context(|| format!("Run not found: {}", run_id))?;

    println!("Run ID: {}", run.id);
    println!("Event: {}", run.event.name);
    println!("State: {}", run.status);
    println!("Started: {}", run.created_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(ref step) = run.failed_step {
        println!("Failed step: {}", step);
    }
    if let Some(ref error) = run.error {
        println!("Error: {}", error);
    }

    println!("\nSteps:");
    if run.steps.is_empty() {
        println!("  (none attempted)");
    }
    for step in &run.steps {
        println!(
            "  {:<20} {:<10} attempts={}{}",
            step.step,
            step.status,
            step.attempts,
            step.error
                .as_ref()
                .map(|e| format!("  error={}", e))
                .unwrap_or_default()
        );
    }

    if journal {
        println!("\nJournal:");
        for entry in store.run_events(run_id)? {
            println!(
                "  {} {:<16} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                entry.kind.as_str(),
                entry.summary
            );
        }
    }

    Ok(())
}

/// List recent runs
fn list_runs(limit: usize, status: Option<RunStatus>) -> Result<()> {
    let settings = config::config()?;
    let store = open_store(settings)?;

    let runs = store.list_runs(limit, status)?;
    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<46} {:<28} {:<10}", "RUN ID", "EVENT", "STATE");
    println!("{}", "-".repeat(86));

    for run in runs {
        println!("{:<46} {:<28} {:<10}", run.id, run.event.name, run.status);
    }

    Ok(())
}

/// Re-drive runs left running
async fn resume_runs() -> Result<()> {
    let settings = config::config()?;
    let dispatcher = start_dispatcher(settings)?;

    let handles = dispatcher.resume_pending()?;
    if handles.is_empty() {
        println!("No runs to resume");
        dispatcher.shutdown().await;
        return Ok(());
    }

    let mut failed = 0;
    for handle in handles {
        let run_id = handle.run_id().to_string();
        match handle.wait().await {
            Ok(status) => {
                if status == RunStatus::Failed {
                    failed += 1;
                }
                println!("{:<46} {}", run_id, status);
            }
            Err(e) => {
                failed += 1;
                println!("{:<46} aborted ({})", run_id, e);
            }
        }
    }

    dispatcher.shutdown().await;

    if failed > 0 {
        eprintln!("\n[{} run(s) did not complete]", failed);
        std::process::exit(1);
    }

    Ok(())
}

/// Show a record as JSON
fn show_record(record_id: &str) -> Result<()> {
    let settings = config::config()?;
    let store = open_store(settings)?;

    let record = store
        .get_record(record_id)?
        .with_context(|| format!("Record not found: {}", record_id))?;

    println!("{}", serde_json::to_string_pretty(&record)?);

    let generations = store.generations_for_record(record_id)?;
    if !generations.is_empty() {
        println!("\nGenerations:");
        for entry in generations {
            println!("  {} [{}] {}", entry.created_at, entry.model, entry.prompt);
        }
    }

    Ok(())
}

/// Seed records from a JSON file
fn import_records(path: &Path) -> Result<()> {
    let settings = config::config()?;
    let store = open_store(settings)?;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_records(&content)
        .with_context(|| format!("Failed to parse records in {}", path.display()))?;

    for record in &records {
        store.upsert_record(record)?;
    }

    println!("Imported {} record(s)", records.len());
    Ok(())
}

/// One record object or an array of them
fn parse_records(content: &str) -> Result<Vec<PropertyRecord>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let records = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(records)
}

/// Show usage counters
fn show_usage(owner_id: &str) -> Result<()> {
    let settings = config::config()?;
    let store = open_store(settings)?;

    let counters = store.usage_counters(owner_id)?;
    if counters.is_empty() {
        println!("No usage recorded for {}", owner_id);
        return Ok(());
    }

    println!("{:<14} {:>8}", "COUNTER", "COUNT");
    println!("{}", "-".repeat(23));
    for counter in counters {
        println!("{:<14} {:>8}", counter.kind, counter.count);
    }

    Ok(())
}

/// Show configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("hearth configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Execution:");
    println!("  Workers:        {}", cfg.workers);
    println!("  Max attempts:   {}", cfg.retry.max_attempts);
    println!(
        "  Backoff:        {}ms x{} (max {}ms)",
        cfg.retry.initial_delay_ms, cfg.retry.backoff_multiplier, cfg.retry.max_delay_ms
    );
    println!();
    println!("Enrichment:");
    println!("  Interest rate:  {}%", cfg.enrichment.interest_rate);
    println!("  Recently sold:  {}", cfg.enrichment.recently_sold);
    println!(
        "  Places search:  {}m, max {} results",
        cfg.enrichment.places_radius_m, cfg.enrichment.places_max_results
    );
    println!();
    println!("Providers:");
    println!("  Realty: {} (key {})", cfg.http.realty_base_url, key_state(&cfg.http.house_data_api_key));
    println!("  Places: {} (key {})", cfg.http.places_base_url, key_state(&cfg.http.google_api_key));
    println!("  Timeout: {}s", cfg.http.timeout_seconds);

    Ok(())
}

fn key_state(key: &Option<String>) -> &'static str {
    if key.is_some() {
        "set"
    } else {
        "missing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_and_many_records() {
        let one = parse_records(r#"{"id": "R1", "price": 300000}"#).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].price, Some(300000.0));

        let many = parse_records(r#"[{"id": "R1"}, {"id": "R2", "ownerId": "u1"}]"#).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].owner_id.as_deref(), Some("u1"));

        assert!(parse_records("[1, 2]").is_err());
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "hearth",
            "submit",
            "enrich-record",
            "--data",
            r#"{"recordId": "R1", "ownerId": "u1"}"#,
        ])
        .unwrap();

        match cli.command {
            Commands::Submit { event, data, no_wait } => {
                assert_eq!(event, "enrich-record");
                assert!(data.unwrap().contains("R1"));
                assert!(!no_wait);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

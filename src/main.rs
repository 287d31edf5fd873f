mod coil;
mod config;
mod data_dir;
mod ingest;
mod ledger;
mod metric_name;
mod pipeline;
mod publish;
mod report;
mod retry;
mod status;
mod store;
#[cfg(test)]
mod test_support;
mod timestamp;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::CollectorConfig;
use data_dir::StateDir;
use ingest::IngestSettings;
use ledger::Ledger;
use metric_name::{section_samples, ScannerLocation};
use pipeline::Pipeline;
use publish::{FilteredPublisher, PlaintextPublisher, PublishMode, Publisher};
use status::StatusFile;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use store::{DiskStore, ReportStore};
use tracing_subscriber::EnvFilter;

/// Collects scanner stability reports from export directories and
/// republishes their measurements as a flat metric stream. Each invocation
/// processes every configured location once.
#[derive(Parser, Debug)]
#[command(name = "stability-collector", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "stability.toml")]
    config: PathBuf,

    /// Log samples instead of publishing them (overrides config)
    #[arg(long)]
    dry_run: bool,

    /// Publisher output file, `-` for stdout (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Parse one report and print the samples it would produce; nothing is
    /// published or moved
    #[arg(long, value_name = "FILE", requires = "location")]
    inspect: Option<PathBuf>,

    /// Scanner location used to name samples with --inspect
    #[arg(long)]
    location: Option<String>,

    /// Print the summary of the last run and exit
    #[arg(long, conflicts_with = "inspect")]
    status: bool,

    /// Debug logging (file state transitions, skipped files)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    // stdout belongs to the publisher.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    if let Some(file) = &cli.inspect {
        let location = cli.location.as_deref().unwrap_or_default();
        return inspect(cli, file, location).map(|()| ExitCode::SUCCESS);
    }

    let mut config = CollectorConfig::load(&cli.config)?;
    if cli.dry_run {
        config.publisher.dry_run = true;
    }
    if let Some(output) = &cli.output {
        config.publisher.output = output.clone();
    }
    let scanners = config.validate()?;

    let state = StateDir::new(&config.state_dir);

    if cli.status {
        print_status(&state)?;
        return Ok(ExitCode::SUCCESS);
    }

    prepare_state(&state)?;

    let mode = if config.publisher.dry_run {
        PublishMode::DryRun
    } else {
        PublishMode::Live
    };
    let sink = PlaintextPublisher::open(&config.publisher.output, mode)?;
    let mut publisher = FilteredPublisher::new(sink, config.filter()?);

    let settings = IngestSettings {
        file_prefix: config.format.file_prefix.clone(),
        expected: config.expected_shape(),
        ingested_dir: config.ingest.ingested_dir.clone(),
        quarantine_dir: config.rejects.quarantine_dir.clone(),
        dry_run: mode == PublishMode::DryRun,
    };
    let mut pipeline = Pipeline::new(&DiskStore, &state, settings, mode == PublishMode::DryRun);
    if let Some(policy) = config.reject_policy() {
        let ledger = Ledger::open_or_create(&state.ledger())
            .with_context(|| format!("failed to open ledger {}", state.ledger().display()))?;
        pipeline = pipeline.with_ledger(ledger, policy);
    }

    tracing::info!(
        locations = scanners.len(),
        dry_run = mode == PublishMode::DryRun,
        "stability-collector starting"
    );
    let summary = pipeline.run(&scanners, &mut publisher);
    tracing::debug!(
        published = publisher.inner().published(),
        dropped = publisher.dropped(),
        "publisher totals"
    );

    if let Err(e) = StatusFile::new(state.status()).write(&summary) {
        tracing::warn!(error = %e, "failed to write status file");
    }

    Ok(if summary.failed_locations() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn prepare_state(state: &StateDir) -> Result<()> {
    let created = state
        .init()
        .with_context(|| format!("failed to create state directory {}", state.root().display()))?;
    if created {
        tracing::info!(path = %state.root().display(), "created state directory");
    }
    Ok(())
}

fn print_status(state: &StateDir) -> Result<()> {
    let status = StatusFile::new(state.status());
    match status.read()? {
        Some(summary) => print!("{}", status::render(&summary)),
        None => println!("no run recorded in {}", status.path().display()),
    }

    // Only present when the rejection ledger has been enabled at some point.
    if state.ledger().exists() {
        let rejections = Ledger::open_or_create(&state.ledger())
            .and_then(|ledger| ledger.list())
            .with_context(|| format!("failed to read ledger {}", state.ledger().display()))?;
        if !rejections.is_empty() {
            println!("rejected reports:");
        }
        for r in &rejections {
            println!(
                "  {} ({} attempts, retry after {}): {}",
                r.path,
                r.attempts,
                status::format_epoch(r.not_before),
                r.last_error
            );
        }
    }
    Ok(())
}

/// Dry run for a single report: print the sample lines it would produce.
fn inspect(cli: &Cli, file: &Path, location: &str) -> Result<()> {
    // The config is optional here; only the expected format is used.
    let config = if cli.config.exists() {
        CollectorConfig::load(&cli.config)?
    } else {
        CollectorConfig::default()
    };
    let location = ScannerLocation::parse(location)?;

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let timestamp = timestamp::extract_epoch(&name)?;
    let text = DiskStore
        .read(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let parsed = report::parse(&text, config.expected_shape())?;
    let coil = coil::resolve(&parsed.configuration.channels)?;

    for defect in &parsed.defects {
        tracing::warn!(error = %defect, "malformed section would be dropped");
    }
    if parsed.sections.is_empty() {
        bail!("{} has no usable sections", file.display());
    }

    let mut out = PlaintextPublisher::new(std::io::stdout().lock(), PublishMode::Live);
    for section in &parsed.sections {
        for sample in section_samples(&location, &coil, section, timestamp) {
            out.publish(&sample)?;
        }
    }
    out.flush()?;
    tracing::info!(
        coil = %coil,
        sections = parsed.sections.len(),
        samples = out.published(),
        "report inspected"
    );
    Ok(())
}

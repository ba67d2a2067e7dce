use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod cross_year;
mod daily_parser;
mod error;
mod error_scan;
mod fields;
mod multi_year;
mod overlap_stitcher;
mod pipeline;
mod report;
mod run_assembler;
mod run_id;
mod savgol;
mod series;
mod table;

use config::PipelineConfig;
use report::{EventLog, Severity};
use run_id::StationCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "GipsyX PPP post-processing and stitching", long_about = None)]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble, stitch and join the yearly solutions of a station
    Process(ProcessArgs),
    /// Report which runs failed and why
    ScanErrors(ScanArgs),
}

#[derive(Parser, Debug)]
struct ProcessArgs {
    /// Directory with the run solution files
    #[arg(long, value_hint = ValueHint::DirPath)]
    tdppath: PathBuf,

    /// Directory for yearly and multi-year tables
    #[arg(long, value_hint = ValueHint::DirPath)]
    savepath: PathBuf,

    /// Only process this 4-character station
    #[arg(long, value_parser = parse_station)]
    station: Option<StationCode>,

    /// TOML configuration file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Parser threads (default: one per core)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Parser, Debug)]
struct ScanArgs {
    /// Directory with run solution files and error logs
    #[arg(long, value_hint = ValueHint::DirPath)]
    tdppath: PathBuf,

    /// TOML configuration file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
}

fn parse_station(raw: &str) -> std::result::Result<StationCode, String> {
    StationCode::parse(raw).map_err(|e| e.to_string())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Process(args) => handle_process(args),
        Command::ScanErrors(args) => handle_scan(args),
    }
}

fn handle_process(args: ProcessArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    config.validate().context("invalid configuration")?;

    info!(
        "processing {} into {} with {} workers",
        args.tdppath.display(),
        args.savepath.display(),
        config.worker_count()
    );

    let mut log = EventLog::new();
    let summary = pipeline::process(
        &args.tdppath,
        &args.savepath,
        args.station.as_ref(),
        &config,
        &mut log,
    )
    .context("processing aborted")?;

    println!("\nSummary");
    println!("=======");
    println!(
        "raw tables:  {} written, {} skipped, {} failed",
        summary.raw.written.len(),
        summary.raw.skipped.len(),
        summary.raw.failed
    );
    println!(
        "post tables: {} written, {} skipped, {} failed",
        summary.post.written.len(),
        summary.post.skipped.len(),
        summary.post.failed
    );
    for path in &summary.multi_year {
        println!("final table: {}", path.display());
    }
    if !summary.report.unreadable.is_empty() {
        println!("\nExcluded run files:");
        for (path, reason) in &summary.report.unreadable {
            println!("  {}: {}", path.display(), reason);
        }
    }
    let warnings: Vec<_> = log.warnings().collect();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for event in &warnings {
            println!("  {}", event);
        }
    }
    println!(
        "\n{} warnings, {} errors",
        warnings.len(),
        log.count(Severity::Error)
    );
    Ok(())
}

fn handle_scan(args: ScanArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut log = EventLog::new();
    let report = error_scan::scan_errors(&args.tdppath, &config, &mut log)
        .with_context(|| format!("failed to scan {}", args.tdppath.display()))?;

    println!("\nRun error analysis");
    println!("==================");
    println!(
        "total: {}, successful: {}, failed: {}",
        report.total(),
        report.successful,
        report.failed()
    );
    println!("success percent: {:.1}%", report.success_percent());
    println!("error percent:   {:.1}%", report.error_percent());
    println!("unrecognized failures: {}", report.unrecognized().count());

    if !report.failures.is_empty() {
        println!("\nFailure markers:");
        for (marker, count) in report.marker_counts() {
            println!("  {:<12} {}", marker, count);
        }
        println!("\nMost frequent diagnostics:");
        for (line, count) in report.line_counts().iter().take(20) {
            println!("  {:>5}  {}", count, line);
        }
        println!("\nFailed runs:");
        for failure in &report.failures {
            let class = match failure.class {
                error_scan::FailureClass::Recognized => "",
                error_scan::FailureClass::Unrecognized => "  (new error)",
            };
            println!(
                "  {}  {}{}",
                failure.date().format("%Y-%m-%d"),
                failure.run,
                class
            );
        }
    }
    Ok(())
}

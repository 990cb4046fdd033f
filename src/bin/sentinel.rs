//! Sentinel CLI - Command-line interface for Synheart Sentinel
//!
//! Commands:
//! - normalize: Turn one saved vendor response into daily rows
//! - detect: Enrich daily rows with baselines and anomaly flags
//! - sync: Process the dates in the window that the store lacks (incremental)
//! - backfill: Enrich and store the whole window as one series
//! - summary: Assess already-stored rows without fetching
//! - latest: Print the cached result of the most recent run
//! - doctor: Diagnose configuration and data directories

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_sentinel::adapters::{UltrahumanAdapter, VendorPayloadAdapter};
use synheart_sentinel::cache::{ANOMALIES_KEY, EXPLANATION_KEY, LATEST_RESULT_KEY};
use synheart_sentinel::config::MAX_DAYS_BACK;
use synheart_sentinel::error::{CacheError, FetchError, PipelineError, StoreError, ValidationError};
use synheart_sentinel::{
    AnomalyEngine, CuratedStore, DailyTable, FileCache, FileMetricSource, FsCuratedStore,
    Normalizer, ResultCache, SentinelConfig, SentinelPipeline, PRODUCER_NAME, SENTINEL_VERSION,
};

/// Sentinel - Rolling-baseline anomaly detection for daily wearable metrics
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(author = "Synheart AI Inc")]
#[command(version = SENTINEL_VERSION)]
#[command(about = "Detect anomalies in daily wearable metrics", long_about = None)]
struct Cli {
    /// JSON configuration file (SENTINEL_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn one saved vendor response into daily rows
    Normalize {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Enrich daily rows with baselines and anomaly flags
    Detect {
        /// Input file path holding a JSON array of daily rows (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Baseline window in records
        #[arg(long, default_value = "7")]
        window: usize,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Process the dates in the window that the store lacks
    Sync {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Enrich and store the whole window as one series
    Backfill {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Assess already-stored rows without fetching
    Summary {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Print the cached result of the most recent run
    Latest,

    /// Diagnose configuration and data directories
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct WindowArgs {
    /// Last date of the window (defaults to today at the configured offset)
    #[arg(long)]
    today: Option<NaiveDate>,

    /// Days before the last date to include (defaults to the configured value)
    #[arg(long)]
    days_back: Option<u32>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter_directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "synheart_sentinel=info".to_string());

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_writer(io::stderr)
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_writer(io::stderr)
            .try_init();
    }
}

fn run(cli: Cli) -> Result<(), SentinelCliError> {
    let config = SentinelConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Normalize {
            input,
            output_format,
        } => cmd_normalize(&config, &input, &output_format),

        Commands::Detect {
            input,
            window,
            output_format,
        } => cmd_detect(&input, window, &output_format),

        Commands::Sync { window } => cmd_sync(&config, &window),

        Commands::Backfill { window } => cmd_backfill(&config, &window),

        Commands::Summary { window } => cmd_summary(&config, &window),

        Commands::Latest => cmd_latest(&config),

        Commands::Doctor { json } => cmd_doctor(&config, json),
    }
}

fn read_input(input: &Path) -> Result<String, SentinelCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_normalize(
    config: &SentinelConfig,
    input: &Path,
    output_format: &OutputFormat,
) -> Result<(), SentinelCliError> {
    config.validate()?;
    let raw = read_input(input)?;
    let label = input.to_string_lossy();
    let events = UltrahumanAdapter.parse(&raw, &label)?;
    if events.is_empty() {
        return Err(SentinelCliError::NoEvents);
    }

    let normalizer = Normalizer::with_utc_offset_minutes(config.utc_offset_minutes)?;
    let table = normalizer.normalize(&events, &config.patient_id)?;
    print!("{}", format_output(table.rows(), output_format)?);
    Ok(())
}

fn cmd_detect(input: &Path, window: usize, output_format: &OutputFormat) -> Result<(), SentinelCliError> {
    let raw = read_input(input)?;
    let table = DailyTable::from_json_rows(&raw)?;
    let enriched = AnomalyEngine::with_window(window).detect(&table)?;
    print!("{}", format_output(enriched.rows(), output_format)?);
    Ok(())
}

type FilePipeline = SentinelPipeline<FileMetricSource, FsCuratedStore>;

fn open_pipeline(config: &SentinelConfig) -> Result<FilePipeline, SentinelCliError> {
    let source = FileMetricSource::new(config.raw_dir());
    let store = FsCuratedStore::new(config.store_dir());
    let cache = FileCache::new(config.cache_dir());
    Ok(SentinelPipeline::from_config(source, store, config)?.with_cache(Box::new(cache)))
}

fn resolve_window(config: &SentinelConfig, args: &WindowArgs) -> Result<(NaiveDate, u32), SentinelCliError> {
    let today = match args.today {
        Some(date) => date,
        None => {
            let offset = Normalizer::with_utc_offset_minutes(config.utc_offset_minutes)?.offset();
            Utc::now().with_timezone(&offset).date_naive()
        }
    };
    let days_back = args.days_back.unwrap_or(config.days_back);
    if days_back > MAX_DAYS_BACK {
        return Err(ValidationError::InvalidInput(format!(
            "days_back must be at most {MAX_DAYS_BACK}, got {days_back}"
        ))
        .into());
    }
    Ok((today, days_back))
}

fn cmd_sync(config: &SentinelConfig, args: &WindowArgs) -> Result<(), SentinelCliError> {
    let pipeline = open_pipeline(config)?;
    let (today, days_back) = resolve_window(config, args)?;
    let report = pipeline.run_incremental(today, days_back);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_backfill(config: &SentinelConfig, args: &WindowArgs) -> Result<(), SentinelCliError> {
    let pipeline = open_pipeline(config)?;
    let (today, days_back) = resolve_window(config, args)?;
    let report = pipeline.run_backfill(today, days_back)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_summary(config: &SentinelConfig, args: &WindowArgs) -> Result<(), SentinelCliError> {
    let pipeline = open_pipeline(config)?;
    let (today, days_back) = resolve_window(config, args)?;
    let assessment = pipeline.summarize_stored(today, days_back)?;
    println!("{}", serde_json::to_string_pretty(&assessment)?);
    Ok(())
}

fn cmd_latest(config: &SentinelConfig) -> Result<(), SentinelCliError> {
    let cache = FileCache::new(config.cache_dir());
    let mut latest = serde_json::Map::new();
    for key in [LATEST_RESULT_KEY, ANOMALIES_KEY, EXPLANATION_KEY] {
        let value = cache.get(key)?.unwrap_or(serde_json::Value::Null);
        latest.insert(key.to_string(), value);
    }
    println!("{}", serde_json::to_string_pretty(&latest)?);
    Ok(())
}

fn cmd_doctor(config: &SentinelConfig, json: bool) -> Result<(), SentinelCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "sentinel_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Sentinel version {}", SENTINEL_VERSION),
    });

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!("Patient {} with a {}-day window", config.patient_id, config.days_back),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    let raw_dir = config.raw_dir();
    checks.push(if raw_dir.is_dir() {
        let saved = fs::read_dir(&raw_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0);
        DoctorCheck {
            name: "raw_dir".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} saved responses in {}", saved, raw_dir.display()),
        }
    } else {
        DoctorCheck {
            name: "raw_dir".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist", raw_dir.display()),
        }
    });

    if !config.patient_id.trim().is_empty() {
        let store = FsCuratedStore::new(config.store_dir());
        checks.push(match store.list_existing_dates(&config.patient_id) {
            Ok(dates) => DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Ok,
                message: match (dates.first(), dates.last()) {
                    (Some(first), Some(last)) => {
                        format!("{} stored dates ({} to {})", dates.len(), first, last)
                    }
                    _ => "No stored dates yet".to_string(),
                },
            },
            Err(e) => DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        });
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (use -i - to read it)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SENTINEL_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Sentinel Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SentinelCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn format_output<T: Serialize>(rows: &[T], format: &OutputFormat) -> Result<String, SentinelCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for row in rows {
                lines.push(serde_json::to_string(row)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(rows)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(rows)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum SentinelCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Validation(ValidationError),
    Fetch(FetchError),
    Store(StoreError),
    Cache(CacheError),
    Pipeline(PipelineError),
    NoEvents,
    DoctorFailed,
}

impl From<io::Error> for SentinelCliError {
    fn from(e: io::Error) -> Self {
        SentinelCliError::Io(e)
    }
}

impl From<serde_json::Error> for SentinelCliError {
    fn from(e: serde_json::Error) -> Self {
        SentinelCliError::Json(e)
    }
}

impl From<ValidationError> for SentinelCliError {
    fn from(e: ValidationError) -> Self {
        SentinelCliError::Validation(e)
    }
}

impl From<FetchError> for SentinelCliError {
    fn from(e: FetchError) -> Self {
        SentinelCliError::Fetch(e)
    }
}

impl From<CacheError> for SentinelCliError {
    fn from(e: CacheError) -> Self {
        SentinelCliError::Cache(e)
    }
}

impl From<PipelineError> for SentinelCliError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(e) => SentinelCliError::Validation(e),
            PipelineError::Fetch(e) => SentinelCliError::Fetch(e),
            PipelineError::Store(e) => SentinelCliError::Store(e),
            other => SentinelCliError::Pipeline(other),
        }
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SentinelCliError> for CliError {
    fn from(e: SentinelCliError) -> Self {
        match e {
            SentinelCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SentinelCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SentinelCliError::Validation(e) => CliError {
                code: "VALIDATION_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'sentinel doctor' to check configuration".to_string()),
            },
            SentinelCliError::Fetch(e) => CliError {
                code: "FETCH_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the saved vendor responses in the raw directory".to_string()),
            },
            SentinelCliError::Store(e) => CliError {
                code: "STORE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the curated store directory".to_string()),
            },
            SentinelCliError::Cache(e) => CliError {
                code: "CACHE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'sentinel sync' to refresh the cached result".to_string()),
            },
            SentinelCliError::Pipeline(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SentinelCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No metric events found in input".to_string(),
                hint: Some("Ensure the response contains recognised metric types".to_string()),
            },
            SentinelCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

mod config;
mod error;
mod ingest;
mod logging;
mod models;
mod report;
mod stats;
mod ui;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use crate::config::{ensure_initialized, load_config, log_path, AppConfig};
use error::AppError;
use ingest::{parse_timestamp, CsvFileSource, RecordSource};
use models::{TimeRange, UsageRecord, Zone};
use report::{render_categories, render_detail, render_summaries, ReportFormat};
use std::path::PathBuf;
use ui::run::run_tui;

#[derive(Debug, Parser)]
#[command(name = "usage-chart")]
#[command(about = "Hourly and daily cost breakdown of AI usage exports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    Stats {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        window: Option<String>,
        #[arg(long, default_value = "table")]
        format: String,
        #[arg(long)]
        now: Option<String>,
    },
    Models {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        window: Option<String>,
        #[arg(long)]
        now: Option<String>,
    },
    Detail {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        window: Option<String>,
        #[arg(long)]
        now: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Tui {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn validate_window(input: &str) -> Result<TimeRange, AppError> {
    match input {
        "1d" => Ok(TimeRange::OneDay),
        "7d" => Ok(TimeRange::SevenDays),
        "30d" => Ok(TimeRange::ThirtyDays),
        _ => Err(AppError::Config(
            "Unsupported window. Use 1d, 7d, or 30d.".into(),
        )),
    }
}

fn resolve_window(input: Option<&str>, cfg: &AppConfig) -> Result<TimeRange, AppError> {
    input.map_or(Ok(cfg.default_window), validate_window)
}

fn resolve_file(input: Option<PathBuf>, cfg: &AppConfig) -> Result<PathBuf, AppError> {
    input.or_else(|| cfg.default_file.clone()).ok_or_else(|| {
        AppError::Config(
            "No usage file given. Pass --file or set default_file in config.toml.".into(),
        )
    })
}

fn resolve_now(input: Option<&str>, zone: Zone) -> Result<NaiveDateTime, AppError> {
    match input {
        None => Ok(zone.now()),
        Some(raw) => parse_timestamp(raw, zone)
            .map(|ts| zone.wall_clock(ts))
            .ok_or_else(|| AppError::Config(format!("Invalid --now value '{raw}'."))),
    }
}

async fn load_records(file: PathBuf, zone: Zone) -> Result<Vec<UsageRecord>, AppError> {
    CsvFileSource::new(file, zone).load().await
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    // The dashboard owns the terminal, so it logs to a file.
    if matches!(cli.command, Commands::Tui { .. }) {
        ensure_initialized()?;
        logging::init_file(&log_path()?)?;
    } else {
        logging::init_stderr();
        ensure_initialized()?;
    }
    let cfg = load_config()?;
    let zone = cfg.timezone;

    match cli.command {
        Commands::Init => {
            println!("Initialized usage-chart config and data directories.");
        }
        Commands::Stats {
            file,
            window,
            format,
            now,
        } => {
            let range = resolve_window(window.as_deref(), &cfg)?;
            let format = ReportFormat::from_label(&format)?;
            let now = resolve_now(now.as_deref(), zone)?;
            let records = load_records(resolve_file(file, &cfg)?, zone).await?;
            let summaries = stats::process_stats(&records, range, now, zone);
            print!("{}", render_summaries(&summaries, range, format)?);
            if format == ReportFormat::Json {
                println!();
            }
        }
        Commands::Models { file, window, now } => {
            let range = resolve_window(window.as_deref(), &cfg)?;
            let now = resolve_now(now.as_deref(), zone)?;
            let records = load_records(resolve_file(file, &cfg)?, zone).await?;
            let summaries = stats::process_stats(&records, range, now, zone);
            print!(
                "{}",
                render_categories(&stats::unique_categories(&summaries))
            );
        }
        Commands::Detail {
            bucket,
            file,
            window,
            now,
            json,
        } => {
            let range = resolve_window(window.as_deref(), &cfg)?;
            let now = resolve_now(now.as_deref(), zone)?;
            let records = load_records(resolve_file(file, &cfg)?, zone).await?;
            let detail =
                stats::bucket_detail(&records, &bucket, range.granularity(), now, zone)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print!("{}", render_detail(&detail));
            }
        }
        Commands::Tui { file } => {
            let file = resolve_file(file, &cfg)?;
            run_tui(cfg, file).await?;
        }
    }

    Ok(())
}

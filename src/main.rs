//! CLI entry point for the taxi day/night analysis.
//!
//! `analyze` produces the zone, desert and trip tables; `report` prints them
//! for planners. `diagnose` and `repair` deal with the column-shifted raw
//! extract.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use taxi_daynight::analyzers::analyzer::{AnalysisOptions, run};
use taxi_daynight::analyzers::integrity::check_vehicle_ids;
use taxi_daynight::config::PipelineConfig;
use taxi_daynight::features::featurize_all;
use taxi_daynight::ingest::load_pings;
use taxi_daynight::repair::{diagnose, needs_repair, repair};
use taxi_daynight::report::CityPlannerReport;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "taxi_daynight")]
#[command(about = "Day/night activity analysis of taxi GPS pings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write every output table
    Analyze {
        /// CSV or Parquet file of GPS pings
        #[arg(short, long)]
        input: PathBuf,

        /// JSON config with column names and thresholds
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for the output tables (overrides the config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Do not segment trips at all
        #[arg(long, default_value_t = false)]
        skip_trips: bool,

        /// Fail instead of skipping trips when vehicle ids look unusable
        #[arg(long, default_value_t = false)]
        strict_ids: bool,
    },
    /// Check whether vehicle ids are usable for trip segmentation
    CheckIds {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print column types and sample values of a Parquet file
    Diagnose {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Write a repaired copy of the column-shifted raw extract
    Repair {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the city planner report from an output directory
    Report {
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Rows per ranked section
        #[arg(short = 'n', long, default_value_t = 10)]
        top: usize,

        /// Only print; do not write the summary CSVs
        #[arg(long, default_value_t = false)]
        no_export: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/taxi_daynight.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("taxi_daynight.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            config,
            output_dir,
            skip_trips,
            strict_ids,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = output_dir {
                config = config.with_output_dir(dir);
            }
            let (report, summary) = run(
                &input,
                config,
                AnalysisOptions {
                    skip_trips,
                    strict_ids,
                },
            )
                .with_context(|| format!("analysis of {} failed", input.display()))?;

            info!(
                run_id = %summary.run_id,
                pings = report.pings,
                zone_rows = report.zone_activity_rows,
                demand_rows = report.night_demand_rows,
                desert_rows = report.desert_rows,
                segments = ?report.trip_segments,
                elapsed_ms = summary.elapsed_ms as u64,
                "Analysis complete"
            );
        }
        Commands::CheckIds { input, config } => {
            let config = load_config(config.as_deref())?;
            let pings = load_pings(&input, &config)?;
            let featured = featurize_all(pings);
            let diagnostic = check_vehicle_ids(&featured, &config.thresholds);
            println!("{diagnostic}");
            diagnostic.require_plausible()?;
        }
        Commands::Diagnose { input } => {
            let columns = diagnose(&input)?;
            for c in &columns {
                println!("{:<20} {:<32} {}", c.name, c.data_type, c.samples.join(" | "));
            }
            if needs_repair(&input)? {
                warn!("Column layout matches the known shift; run `repair` before analysis");
            }
        }
        Commands::Repair { input, output } => {
            let report = repair(&input, &output)?;
            info!(
                rows = report.rows,
                columns = ?report.columns,
                output = %report.output.display(),
                "Repair complete"
            );
        }
        Commands::Report {
            output_dir,
            top,
            no_export,
        } => {
            let report = CityPlannerReport::load(&output_dir).with_context(|| {
                format!("failed to read analysis outputs in {}", output_dir.display())
            })?;
            println!("{}", report.render(top));
            if !no_export {
                report.export_summaries(&output_dir)?;
            }
        }
    }

    Ok(())
}

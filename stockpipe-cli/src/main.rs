//! stockpipe CLI: run the stock-market ELT pipeline.
//!
//! Commands:
//! - `run`: execute the whole task graph once
//! - `extract`: only the extraction-and-load task
//! - `schedule`: stay resident and run on the daily schedule
//! - `next-run`: print when the schedule fires next
//!
//! Settings come from an optional `--config` TOML file and the environment
//! (a `.env` file in the working directory is read first).

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stockpipe_core::data::{apply_fetch_delay, HistorySource, YahooHistory};
use stockpipe_core::warehouse::BigQuerySink;
use stockpipe_runner::{
    extract_and_load, ExtractRequest, LogProgress, Pipeline, PipelineConfig, ProcessRunner,
    Schedule,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stockpipe",
    about = "Daily stock price ELT: Yahoo Finance to BigQuery, then dbt"
)]
struct Cli {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task once: extract and load, summary, dbt run, dbt test.
    Run,
    /// Extract and load only, skipping the dbt steps.
    Extract {
        /// Print the load result as JSON on stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run the pipeline on its daily schedule until interrupted.
    Schedule,
    /// Print the next scheduled run time.
    NextRun,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config)?;
            run_once(&config)
        }
        Commands::Extract { json } => {
            let config = load_config(cli.config)?;
            run_extract(&config, json)
        }
        Commands::Schedule => {
            let config = load_config(cli.config)?;
            run_schedule(&config)
        }
        Commands::NextRun => {
            let schedule = Schedule::daily();
            let next = schedule.next_run_after(Local::now().naive_local());
            println!("{} next run: {next}", schedule.dag_id);
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path.as_deref()).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_source(config: &PipelineConfig) -> Result<Box<dyn HistorySource>> {
    let yahoo = YahooHistory::new().context("failed to build Yahoo Finance client")?;
    let (source, applied) = apply_fetch_delay(
        Box::new(yahoo),
        config.fetch_delay.min_secs,
        config.fetch_delay.max_secs,
    );
    if !applied {
        info!("Fetching without delay");
    }
    Ok(source)
}

fn build_request(config: &PipelineConfig) -> Result<ExtractRequest> {
    Ok(ExtractRequest {
        symbols: config.symbols.clone(),
        history_days: config.history_days,
        table: config.table_ref()?,
    })
}

fn build_sink(config: &PipelineConfig) -> Result<BigQuerySink> {
    BigQuerySink::new(config.credentials_path()?).context("failed to build BigQuery client")
}

fn run_once(config: &PipelineConfig) -> Result<()> {
    let source = build_source(config)?;
    let sink = build_sink(config)?;
    let steps = ProcessRunner::new(&config.dbt);

    let pipeline = Pipeline {
        source: source.as_ref(),
        sink: &sink,
        steps: &steps,
        progress: &LogProgress,
        request: build_request(config)?,
    };

    let run = pipeline.run()?;
    info!(
        "Pipeline finished: {} rows for {} symbols into {}",
        run.summary.rows, run.summary.symbol_count, run.result.target
    );
    Ok(())
}

fn run_extract(config: &PipelineConfig, json: bool) -> Result<()> {
    let source = build_source(config)?;
    let sink = build_sink(config)?;
    let request = build_request(config)?;

    let result = extract_and_load(source.as_ref(), &sink, &request, &LogProgress)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for (key, value) in result.entries() {
            println!("{key}: {value}");
        }
    }
    Ok(())
}

fn run_schedule(config: &PipelineConfig) -> Result<()> {
    let schedule = Schedule::daily();
    info!(
        dag_id = schedule.dag_id,
        tags = ?schedule.tags,
        "{}",
        schedule.description
    );

    loop {
        let now = Local::now().naive_local();
        let next = schedule.next_run_after(now);
        info!("Next run at {next}");
        std::thread::sleep(schedule.wait_from(now));

        // A failed run is reported and the schedule keeps going
        if let Err(e) = run_once(config) {
            error!("Scheduled run failed: {e:#}");
        }
    }
}

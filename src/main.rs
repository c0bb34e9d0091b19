mod config;
mod error;
mod model;
mod models;
mod pipeline;
mod reshape;
mod scraper;
mod stager;
mod warehouse;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::warehouse::Warehouse;

#[derive(Parser)]
#[command(name = "oil-etl", about = "US crude oil production ETL & forecasting", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: scrape, stage, load, train, forecast, reconcile
    Run,

    /// Show warehouse statistics
    Stats,

    /// Apply schema migrations without running the pipeline
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "oil_production_etl=info,warn",
        1 => "oil_production_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let started = Instant::now();
            let report = Pipeline::new(config).run().await?;
            info!(
                "Pipeline finished in {:.2?}: {} rows loaded, {} forecast rows ({} jobs), {} report rows",
                started.elapsed(),
                report.rows_loaded,
                report.forecast_rows,
                report.forecast_jobs,
                report.report_rows,
            );
        }

        Command::Stats => {
            let wh = Warehouse::open(&config.warehouse.db_path)?;
            wh.run_migrations()?;

            let months = wh.fact_count()?;
            let (min, max) = wh.fact_date_range().unwrap_or((None, None));
            let latest = wh.max_refresh_date().unwrap_or(None);
            let forecasts = match latest {
                Some(d) => wh.forecast_count_for(d)?,
                None => 0,
            };

            println!("─────────────────────────────────");
            println!("  Oil ETL — Warehouse Stats");
            println!("─────────────────────────────────");
            println!("  Months      : {}", months);
            println!("  From        : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To          : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  Last refresh: {}", latest.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  Forecasts   : {}", forecasts);
            println!("  Report rows : {}", wh.report_count()?);
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Warehouse::open(&config.warehouse.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

//! Pipeline orchestrator: scrape → reshape → stage → load → train →
//! forecast sweep → reconcile.
//!
//! Strictly sequential; every stage waits for the previous one's durable
//! output. Any stage error aborts the run and leaves the last successful
//! run's tables intact — the loader's missing-table truncate is the sole
//! tolerated failure. A failure partway through the sweep aborts the run
//! rather than committing a partial horizon/confidence grid; the same-day
//! purge makes the rerun idempotent.

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::model;
use crate::models::{ForecastRecord, ModelSpec, ModelSummary, RunReport};
use crate::reshape::reshape;
use crate::scraper::{EiaScraper, SeriesSource};
use crate::stager::{LocalObjectStore, ObjectStore, stage, wait_until_visible};
use crate::warehouse::Warehouse;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let warehouse = Warehouse::open(&self.config.warehouse.db_path)?;
        if self.config.warehouse.run_migrations {
            warehouse.run_migrations()?;
        }

        let source = EiaScraper::new(&self.config.source)?;
        let store = LocalObjectStore::new(&self.config.staging.root);

        self.run_with(&source, &store, &warehouse).await
    }

    /// Run against explicit collaborators. Every cross-stage handoff goes
    /// through the store or the warehouse, never through in-memory state.
    pub async fn run_with(
        &self,
        source: &dyn SeriesSource,
        store: &dyn ObjectStore,
        warehouse: &Warehouse,
    ) -> Result<RunReport, PipelineError> {
        let cfg = &self.config;

        info!("=== Step 1: Scraping source series ===");
        let raw = source.fetch_raw_table().await?;

        info!("=== Step 2: Reshaping to monthly series ===");
        let observations = reshape(&raw, cfg.source.min_year)?;
        info!("{} observations after reshape", observations.len());

        info!("=== Step 3: Staging to object storage ===");
        let receipt = stage(store, &cfg.staging.object_path, &observations).await?;
        wait_until_visible(
            store,
            &cfg.staging.object_path,
            Duration::from_secs(cfg.staging.settle_timeout_secs),
            Duration::from_millis(cfg.staging.poll_interval_ms),
        )
        .await?;

        info!("=== Step 4: Reloading fact table ===");
        warehouse.truncate_fact()?;
        let rows_loaded = warehouse.load_fact_from(&store.load_uri(&cfg.staging.load_prefix))?;
        info!("Loaded {} rows.", rows_loaded);

        info!("=== Step 5: Training model '{}' ===", cfg.forecast.model_name);
        let spec = ModelSpec {
            name: cfg.forecast.model_name.clone(),
            family: cfg.forecast.family,
            time_column: "Month".into(),
            value_column: "Oil_Production".into(),
            seasonal_period: cfg.forecast.seasonal_period,
            holiday_region: cfg.forecast.holiday_region.clone(),
        };
        let history = warehouse.fact_history()?;
        let fitted = model::fit(&history, &spec)?;
        warehouse.create_or_replace_model(
            &spec,
            &ModelSummary {
                trained_at: Utc::now().naive_utc(),
                observations: history.len(),
                train_end: fitted.train_end(),
            },
        )?;
        info!("Model trained on {} observations", history.len());

        let jobs = cfg.forecast.horizons.len() * cfg.forecast.confidence_levels.len();
        info!("=== Step 6: Forecast sweep ({} jobs) ===", jobs);
        let refresh_date = Utc::now().date_naive();
        let purged = warehouse.delete_forecasts_for(refresh_date)?;
        if purged > 0 {
            info!("Purged {} same-day forecast rows", purged);
        }

        // Re-derive the fit from the registry row + fact table, the run's
        // durable state; a fit failure here is a forecast-stage failure.
        let spec = warehouse.load_model_spec(&cfg.forecast.model_name)?;
        let history = warehouse.fact_history()?;
        let fitted =
            model::fit(&history, &spec).map_err(|e| PipelineError::Forecast(e.to_string()))?;

        let mut forecast_jobs = 0usize;
        let mut forecast_rows = 0usize;
        for &horizon in &cfg.forecast.horizons {
            for &confidence in &cfg.forecast.confidence_levels {
                let points = fitted.predict(horizon, confidence)?;
                let records: Vec<ForecastRecord> = points
                    .into_iter()
                    .map(|p| ForecastRecord::from_point(p, confidence, horizon, refresh_date))
                    .collect();

                let inserted = warehouse.insert_forecasts(&records)?;
                debug!("horizon {} @ {}: {} rows", horizon, confidence, inserted);
                forecast_jobs += 1;
                forecast_rows += inserted;
            }
        }
        info!("{} jobs inserted {} forecast rows", forecast_jobs, forecast_rows);

        info!("=== Step 7: Rebuilding reporting table ===");
        let report_rows = warehouse.rebuild_report()?;

        let report = RunReport {
            rows_reshaped: observations.len(),
            staged_bytes: receipt.bytes,
            rows_loaded,
            model_name: cfg.forecast.model_name.clone(),
            forecast_jobs,
            forecast_rows,
            report_rows,
        };
        info!(
            "=== Done: {} loaded | {} forecast rows | {} report rows ===",
            report.rows_loaded, report.forecast_rows, report.report_rows
        );
        Ok(report)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSeriesTable;
    use async_trait::async_trait;

    struct FakeSource {
        table: RawSeriesTable,
    }

    #[async_trait]
    impl SeriesSource for FakeSource {
        async fn fetch_raw_table(&self) -> Result<RawSeriesTable, PipelineError> {
            Ok(self.table.clone())
        }
    }

    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    /// Three years of wide data, one missing cell (Feb 2023).
    fn wide_table() -> RawSeriesTable {
        let headers = std::iter::once("Year".to_string())
            .chain(MONTHS.iter().map(|m| m.to_string()))
            .collect();

        let rows = (0..3)
            .map(|y| {
                let year = 2021 + y;
                std::iter::once(Some(year.to_string()))
                    .chain((0..12).map(|m| {
                        if year == 2023 && m == 1 {
                            None
                        } else {
                            Some((4000 + y * 100 + m * 10).to_string())
                        }
                    }))
                    .collect()
            })
            .collect();

        RawSeriesTable { headers, rows }
    }

    fn test_config(staging_root: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.staging.root = staging_root.to_path_buf();
        cfg.staging.settle_timeout_secs = 2;
        cfg.staging.poll_interval_ms = 10;
        cfg.forecast.horizons = vec![2, 3];
        cfg.forecast.confidence_levels = vec![0.90, 0.95];
        cfg
    }

    #[tokio::test]
    async fn full_run_builds_every_table() {
        let staging = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open_in_memory().unwrap();
        warehouse.run_migrations().unwrap();

        let pipeline = Pipeline::new(test_config(staging.path()));
        let source = FakeSource { table: wide_table() };
        let store = LocalObjectStore::new(staging.path());

        let report = pipeline
            .run_with(&source, &store, &warehouse)
            .await
            .unwrap();

        // 36 cells minus the one missing month.
        assert_eq!(report.rows_reshaped, 35);
        assert_eq!(report.rows_loaded, 35);
        assert_eq!(warehouse.fact_count().unwrap(), 35);

        // 2 horizons × 2 confidence levels, horizon rows each.
        assert_eq!(report.forecast_jobs, 4);
        assert_eq!(report.forecast_rows, (2 + 3) * 2);

        // Reporting table: every actual + the latest refresh's forecasts.
        assert_eq!(report.report_rows, 35 + 10);
        assert_eq!(warehouse.report_count().unwrap(), 45);
    }

    #[tokio::test]
    async fn same_day_rerun_does_not_duplicate() {
        let staging = tempfile::tempdir().unwrap();
        let warehouse = Warehouse::open_in_memory().unwrap();
        warehouse.run_migrations().unwrap();

        let pipeline = Pipeline::new(test_config(staging.path()));
        let source = FakeSource { table: wide_table() };
        let store = LocalObjectStore::new(staging.path());

        let first = pipeline
            .run_with(&source, &store, &warehouse)
            .await
            .unwrap();
        let second = pipeline
            .run_with(&source, &store, &warehouse)
            .await
            .unwrap();

        assert_eq!(first.forecast_rows, second.forecast_rows);
        let today = Utc::now().date_naive();
        assert_eq!(
            warehouse.forecast_count_for(today).unwrap(),
            second.forecast_rows as i64
        );
        assert_eq!(warehouse.fact_count().unwrap(), 35);
        assert_eq!(warehouse.report_count().unwrap(), 45);
    }
}

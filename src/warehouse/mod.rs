use crate::error::PipelineError;
use crate::models::{ForecastRecord, ModelSpec, ModelSummary, Observation};
use chrono::NaiveDate;
use duckdb::{Connection, params};
use std::path::Path;
use tracing::{info, warn};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS monthly_statistics (
    Month           DATE    NOT NULL,
    Oil_Production  BIGINT  NOT NULL
);

CREATE TABLE IF NOT EXISTS production_forecast (
    forecast_timestamp              DATE    NOT NULL,
    forecast_value                  DOUBLE  NOT NULL,
    confidence_interval_lower_bound DOUBLE  NOT NULL,
    confidence_interval_upper_bound DOUBLE  NOT NULL,
    confidence                      DOUBLE  NOT NULL,
    forecast_interval               DOUBLE,
    standard_error                  DOUBLE,
    forecast_horizon                INTEGER NOT NULL,
    refresh_date                    DATE    NOT NULL
);

CREATE TABLE IF NOT EXISTS forecast_models (
    name         VARCHAR PRIMARY KEY,
    spec         VARCHAR NOT NULL,
    trained_at   TIMESTAMP NOT NULL,
    observations BIGINT NOT NULL,
    train_end    DATE NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_forecast_refresh ON production_forecast (refresh_date);
CREATE INDEX IF NOT EXISTS idx_fact_month       ON monthly_statistics (Month);
"#;

// The reporting table is not part of the DDL: the reconciler recreates it
// wholesale each run (CREATE OR REPLACE TABLE ... AS).
const REPORT_SQL: &str = r#"
CREATE OR REPLACE TABLE actual_forecasted AS (
SELECT Month,
    Oil_Production,
    NULL AS Forecasted_Production,
    NULL AS Forecasted_LowerInterval,
    NULL AS Forecasted_UpperInterval,
    NULL AS Confidence_Level,
    NULL AS forecast_interval,
    NULL AS standard_error,
    NULL AS Margin_Of_Error,
    NULL AS refresh_date
FROM monthly_statistics

UNION ALL

SELECT forecast_timestamp AS Month,
    NULL AS Oil_Production,
    forecast_value AS Forecasted_Production,
    confidence_interval_lower_bound AS Forecasted_LowerInterval,
    confidence_interval_upper_bound AS Forecasted_UpperInterval,
    confidence AS Confidence_Level,
    forecast_interval,
    ROUND(standard_error, 3) AS standard_error,
    ROUND(CASE
        WHEN confidence = 0.80 THEN standard_error * 1.28
        WHEN confidence = 0.85 THEN standard_error * 1.44
        WHEN confidence = 0.90 THEN standard_error * 1.64
        WHEN confidence = 0.95 THEN standard_error * 1.96
    END, 3) AS Margin_Of_Error,
    refresh_date
FROM production_forecast
WHERE refresh_date = (SELECT MAX(refresh_date) FROM production_forecast)
);
"#;

// ── Warehouse ─────────────────────────────────────────────────────────────────

pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Load(format!("could not create dir {parent:?}: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PipelineError::Load(format!("failed to open DuckDB at {path:?}: {e}")))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PipelineError::Load(format!("failed to open DuckDB in memory: {e}")))?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<(), PipelineError> {
        info!("Running migrations…");
        self.conn
            .execute_batch(DDL)
            .map_err(|e| PipelineError::Load(format!("DDL failed: {e}")))?;
        self.conn
            .execute_batch(INDEXES)
            .map_err(|e| PipelineError::Load(format!("index creation failed: {e}")))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
                params![chrono::Utc::now().naive_utc()],
            )
            .map_err(|e| PipelineError::Load(format!("schema_version: {e}")))?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Fact table ────────────────────────────────────────────────────────────

    /// Clear the fact table ahead of the reload. A missing table is the one
    /// tolerated failure (first run against an empty warehouse); anything
    /// else is fatal.
    pub fn truncate_fact(&self) -> Result<(), PipelineError> {
        match self.conn.execute("DELETE FROM monthly_statistics", []) {
            Ok(n) => {
                info!("Cleared {} prior fact rows", n);
                Ok(())
            }
            Err(e) if e.to_string().contains("does not exist") => {
                warn!("monthly_statistics absent, nothing to truncate");
                Ok(())
            }
            Err(e) => Err(PipelineError::Load(format!(
                "truncate monthly_statistics: {e}"
            ))),
        }
    }

    /// Bulk-load every staged object matching `uri` into the fact table.
    /// The header row is skipped and the column types are pinned, so a
    /// malformed staged file fails the load rather than loading garbage.
    pub fn load_fact_from(&self, uri: &str) -> Result<usize, PipelineError> {
        let sql = format!(
            "INSERT INTO monthly_statistics (Month, Oil_Production)
             SELECT Date, Oil_prod
             FROM read_csv('{uri}', header = true,
                           columns = {{'Date': 'DATE', 'Oil_prod': 'BIGINT'}})"
        );
        self.conn
            .execute_batch(&sql)
            .map_err(|e| PipelineError::Load(format!("bulk load from {uri}: {e}")))?;
        let rows = self.fact_count()?;
        Ok(rows as usize)
    }

    /// Full history, ordered by month — the model's training input.
    pub fn fact_history(&self) -> Result<Vec<Observation>, PipelineError> {
        let mut stmt = self
            .conn
            .prepare("SELECT Month, Oil_Production FROM monthly_statistics ORDER BY Month")
            .map_err(|e| PipelineError::Load(format!("history query: {e}")))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Observation {
                    month: r.get(0)?,
                    production: r.get(1)?,
                })
            })
            .map_err(|e| PipelineError::Load(format!("history scan: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::Load(format!("history row: {e}")))
    }

    pub fn fact_count(&self) -> Result<i64, PipelineError> {
        self.count("SELECT COUNT(*) FROM monthly_statistics")
            .map_err(|e| PipelineError::Load(format!("fact count: {e}")))
    }

    pub fn fact_date_range(
        &self,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>), PipelineError> {
        self.conn
            .prepare("SELECT MIN(Month), MAX(Month) FROM monthly_statistics")
            .and_then(|mut s| s.query_row([], |r| Ok((r.get(0)?, r.get(1)?))))
            .map_err(|e| PipelineError::Load(format!("fact range: {e}")))
    }

    // ── Model registry ────────────────────────────────────────────────────────

    /// Create-or-replace: any prior artifact under the same name is gone.
    pub fn create_or_replace_model(
        &self,
        spec: &ModelSpec,
        summary: &ModelSummary,
    ) -> Result<(), PipelineError> {
        let spec_json = serde_json::to_string(spec)
            .map_err(|e| PipelineError::Training(format!("spec serialize: {e}")))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO forecast_models
                     (name, spec, trained_at, observations, train_end)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    spec.name,
                    spec_json,
                    summary.trained_at,
                    summary.observations as i64,
                    summary.train_end,
                ],
            )
            .map_err(|e| PipelineError::Training(format!("register model {}: {e}", spec.name)))?;
        Ok(())
    }

    pub fn load_model_spec(&self, name: &str) -> Result<ModelSpec, PipelineError> {
        let spec_json: String = self
            .conn
            .query_row(
                "SELECT spec FROM forecast_models WHERE name = ?",
                params![name],
                |r| r.get(0),
            )
            .map_err(|e| PipelineError::Forecast(format!("model {name} not found: {e}")))?;
        serde_json::from_str(&spec_json)
            .map_err(|e| PipelineError::Forecast(format!("model {name} spec decode: {e}")))
    }

    // ── Forecast table ────────────────────────────────────────────────────────

    /// Purge this refresh date's rows so a same-day rerun cannot duplicate.
    pub fn delete_forecasts_for(&self, refresh_date: NaiveDate) -> Result<usize, PipelineError> {
        self.conn
            .execute(
                "DELETE FROM production_forecast WHERE refresh_date = ?",
                params![refresh_date],
            )
            .map_err(|e| PipelineError::Forecast(format!("purge {refresh_date}: {e}")))
    }

    pub fn insert_forecasts(&self, records: &[ForecastRecord]) -> Result<usize, PipelineError> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| PipelineError::Forecast(format!("begin insert: {e}")))?;
        let sql = r#"
            INSERT INTO production_forecast
                (forecast_timestamp, forecast_value,
                 confidence_interval_lower_bound, confidence_interval_upper_bound,
                 confidence, forecast_interval, standard_error,
                 forecast_horizon, refresh_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        for rec in records {
            tx.execute(
                sql,
                params![
                    rec.forecast_timestamp,
                    rec.forecast_value,
                    rec.lower_bound,
                    rec.upper_bound,
                    rec.confidence,
                    rec.forecast_interval,
                    rec.standard_error,
                    i64::from(rec.horizon),
                    rec.refresh_date,
                ],
            )
            .map_err(|e| {
                PipelineError::Forecast(format!(
                    "insert forecast {} h={} c={}: {e}",
                    rec.forecast_timestamp, rec.horizon, rec.confidence
                ))
            })?;
        }

        tx.commit()
            .map_err(|e| PipelineError::Forecast(format!("commit insert: {e}")))?;
        Ok(records.len())
    }

    pub fn forecast_count_for(&self, refresh_date: NaiveDate) -> Result<i64, PipelineError> {
        self.conn
            .prepare("SELECT COUNT(*) FROM production_forecast WHERE refresh_date = ?")
            .and_then(|mut s| s.query_row(params![refresh_date], |r| r.get(0)))
            .map_err(|e| PipelineError::Forecast(format!("forecast count: {e}")))
    }

    pub fn max_refresh_date(&self) -> Result<Option<NaiveDate>, PipelineError> {
        self.conn
            .prepare("SELECT MAX(refresh_date) FROM production_forecast")
            .and_then(|mut s| s.query_row([], |r| r.get(0)))
            .map_err(|e| PipelineError::Forecast(format!("max refresh_date: {e}")))
    }

    // ── Reporting table ───────────────────────────────────────────────────────

    /// Drop-and-rebuild the reporting table: every actual plus the latest
    /// refresh's forecasts. One statement, so a failure leaves the previous
    /// table in place.
    pub fn rebuild_report(&self) -> Result<usize, PipelineError> {
        self.conn
            .execute_batch(REPORT_SQL)
            .map_err(|e| PipelineError::Reconcile(format!("rebuild actual_forecasted: {e}")))?;
        let rows = self
            .count("SELECT COUNT(*) FROM actual_forecasted")
            .map_err(|e| PipelineError::Reconcile(format!("report count: {e}")))?;
        Ok(rows as usize)
    }

    /// Row count of the reporting table; 0 if it has never been built.
    pub fn report_count(&self) -> Result<i64, PipelineError> {
        match self.count("SELECT COUNT(*) FROM actual_forecasted") {
            Ok(n) => Ok(n),
            Err(e) if e.to_string().contains("does not exist") => Ok(0),
            Err(e) => Err(PipelineError::Reconcile(format!("report count: {e}"))),
        }
    }

    fn count(&self, sql: &str) -> duckdb::Result<i64> {
        let mut stmt = self.conn.prepare(sql)?;
        stmt.query_row([], |r| r.get(0))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelFamily;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(ts: NaiveDate, confidence: f64, horizon: u32, refresh: NaiveDate) -> ForecastRecord {
        ForecastRecord {
            forecast_timestamp: ts,
            forecast_value: 4000.0,
            lower_bound: 3900.0,
            upper_bound: 4100.0,
            confidence,
            forecast_interval: 200.0,
            standard_error: 2.0,
            horizon,
            refresh_date: refresh,
        }
    }

    fn write_staged(dir: &Path, name: &str, rows: &[(&str, i64)]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        writeln!(f, "Date,Oil_prod").unwrap();
        for (d, v) in rows {
            writeln!(f, "{d},{v}").unwrap();
        }
    }

    #[test]
    fn truncate_missing_table_is_tolerated() {
        let w = Warehouse::open_in_memory().unwrap();
        w.truncate_fact().unwrap();
    }

    #[test]
    fn load_replaces_prior_contents() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();

        let staged = tempfile::tempdir().unwrap();
        write_staged(
            staged.path(),
            "a.csv",
            &[("2022-01-01", 100), ("2022-02-01", 110)],
        );
        write_staged(staged.path(), "b.csv", &[("2022-03-01", 120)]);
        let glob = format!("{}/*.csv", staged.path().display());

        // Seed junk that a replace-not-append load must clear.
        w.conn
            .execute(
                "INSERT INTO monthly_statistics VALUES (?, ?)",
                params![date(1999, 1, 1), 1i64],
            )
            .unwrap();

        w.truncate_fact().unwrap();
        let loaded = w.load_fact_from(&glob).unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(w.fact_count().unwrap(), 3);

        // Rerun: same staged objects, same final count.
        w.truncate_fact().unwrap();
        assert_eq!(w.load_fact_from(&glob).unwrap(), 3);

        let history = w.fact_history().unwrap();
        assert_eq!(history.first().unwrap().month, date(2022, 1, 1));
        assert_eq!(history.last().unwrap().production, 120);
    }

    #[test]
    fn same_day_purge_leaves_prior_days() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();

        let yesterday = date(2024, 3, 1);
        let today = date(2024, 3, 2);
        w.insert_forecasts(&[
            record(date(2025, 1, 1), 0.95, 12, yesterday),
            record(date(2025, 1, 1), 0.95, 12, today),
            record(date(2025, 2, 1), 0.90, 12, today),
        ])
        .unwrap();

        let purged = w.delete_forecasts_for(today).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(w.forecast_count_for(yesterday).unwrap(), 1);
        assert_eq!(w.forecast_count_for(today).unwrap(), 0);
    }

    #[test]
    fn max_refresh_date_tracks_latest_run() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();
        assert_eq!(w.max_refresh_date().unwrap(), None);

        w.insert_forecasts(&[
            record(date(2025, 1, 1), 0.95, 12, date(2024, 3, 1)),
            record(date(2025, 1, 1), 0.95, 12, date(2024, 3, 5)),
        ])
        .unwrap();
        assert_eq!(w.max_refresh_date().unwrap(), Some(date(2024, 3, 5)));
    }

    #[test]
    fn report_unions_actuals_with_latest_refresh_only() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();

        w.conn
            .execute(
                "INSERT INTO monthly_statistics VALUES (?, ?)",
                params![date(2024, 1, 1), 4000i64],
            )
            .unwrap();
        w.insert_forecasts(&[
            record(date(2025, 1, 1), 0.95, 12, date(2024, 3, 1)),
            record(date(2025, 1, 1), 0.95, 12, date(2024, 3, 5)),
            record(date(2025, 2, 1), 0.90, 12, date(2024, 3, 5)),
        ])
        .unwrap();

        let rows = w.rebuild_report().unwrap();
        // 1 actual + the two rows from refresh 2024-03-05.
        assert_eq!(rows, 3);

        let stale: i64 = w
            .conn
            .query_row(
                "SELECT COUNT(*) FROM actual_forecasted WHERE refresh_date = ?",
                params![date(2024, 3, 1)],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);

        let actual_only: i64 = w
            .conn
            .query_row(
                "SELECT COUNT(*) FROM actual_forecasted
                 WHERE Oil_Production IS NOT NULL AND Forecasted_Production IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(actual_only, 1);
    }

    #[test]
    fn margin_of_error_uses_z_lookup() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();

        w.insert_forecasts(&[record(date(2025, 1, 1), 0.95, 12, date(2024, 3, 5))])
            .unwrap();
        w.rebuild_report().unwrap();

        let margin: f64 = w
            .conn
            .query_row(
                "SELECT Margin_Of_Error FROM actual_forecasted WHERE Confidence_Level = 0.95",
                [],
                |r| r.get(0),
            )
            .unwrap();
        // standard_error 2.0 at 0.95 → 2.0 × 1.96
        assert!((margin - 3.92).abs() < 1e-9);
    }

    #[test]
    fn rebuilding_report_is_idempotent() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();
        w.insert_forecasts(&[record(date(2025, 1, 1), 0.95, 12, date(2024, 3, 5))])
            .unwrap();

        assert_eq!(w.rebuild_report().unwrap(), 1);
        assert_eq!(w.rebuild_report().unwrap(), 1);
        assert_eq!(w.report_count().unwrap(), 1);
    }

    #[test]
    fn report_count_is_zero_before_first_build() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();
        assert_eq!(w.report_count().unwrap(), 0);
    }

    #[test]
    fn model_registry_replaces_wholesale() {
        let w = Warehouse::open_in_memory().unwrap();
        w.run_migrations().unwrap();

        let mut spec = ModelSpec {
            name: "oil_production_model".into(),
            family: ModelFamily::MstlEts,
            time_column: "Month".into(),
            value_column: "Oil_Production".into(),
            seasonal_period: 12,
            holiday_region: Some("US".into()),
        };
        let summary = ModelSummary {
            trained_at: chrono::Utc::now().naive_utc(),
            observations: 240,
            train_end: date(2024, 2, 1),
        };

        w.create_or_replace_model(&spec, &summary).unwrap();
        spec.family = ModelFamily::AutoEts;
        w.create_or_replace_model(&spec, &summary).unwrap();

        let loaded = w.load_model_spec("oil_production_model").unwrap();
        assert_eq!(loaded.family, ModelFamily::AutoEts);

        let names: i64 = w
            .conn
            .query_row("SELECT COUNT(*) FROM forecast_models", [], |r| r.get(0))
            .unwrap();
        assert_eq!(names, 1);

        assert!(matches!(
            w.load_model_spec("missing"),
            Err(PipelineError::Forecast(_))
        ));
    }
}

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ── Raw wide table ────────────────────────────────────────────────────────────

/// The year×month table exactly as scraped: one header row, one body row per
/// year, cells trimmed with empty/placeholder values collapsed to `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeriesTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

// ── Tidy observation ──────────────────────────────────────────────────────────

/// One month of production history. `month` is always the first of the month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub month: NaiveDate,
    pub production: i64,
}

// ── Staging ───────────────────────────────────────────────────────────────────

/// Confirmation of a staged object upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub path: String,
    pub bytes: u64,
}

// ── Model registry ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Seasonal decomposition (period = `seasonal_period`) around AutoETS.
    MstlEts,
    /// Plain AutoETS, no seasonal component.
    AutoEts,
}

/// Definition of the named forecasting model. Stored as the registry row's
/// spec JSON; together with the fact table it fully determines the fit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub family: ModelFamily,
    pub time_column: String,
    pub value_column: String,
    pub seasonal_period: usize,
    pub holiday_region: Option<String>,
}

/// Training outcome recorded alongside the spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub trained_at: NaiveDateTime,
    pub observations: usize,
    pub train_end: NaiveDate,
}

// ── Forecast rows ─────────────────────────────────────────────────────────────

/// One forecast point as produced by the model, before sweep tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub timestamp: NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    /// Interval width (upper − lower) at the requested confidence level.
    pub interval_width: f64,
    pub standard_error: f64,
}

/// A forecast-table row: a point tagged with its sweep parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub forecast_timestamp: NaiveDate,
    pub forecast_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub confidence: f64,
    pub forecast_interval: f64,
    pub standard_error: f64,
    pub horizon: u32,
    pub refresh_date: NaiveDate,
}

impl ForecastRecord {
    pub fn from_point(
        point: ForecastPoint,
        confidence: f64,
        horizon: u32,
        refresh_date: NaiveDate,
    ) -> Self {
        Self {
            forecast_timestamp: point.timestamp,
            forecast_value: point.value,
            lower_bound: point.lower,
            upper_bound: point.upper,
            confidence,
            forecast_interval: point.interval_width,
            standard_error: point.standard_error,
            horizon,
            refresh_date,
        }
    }
}

// ── Run report ────────────────────────────────────────────────────────────────

/// What a completed run did, stage by stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub rows_reshaped: usize,
    pub staged_bytes: u64,
    pub rows_loaded: usize,
    pub model_name: String,
    pub forecast_jobs: usize,
    pub forecast_rows: usize,
    pub report_rows: usize,
}

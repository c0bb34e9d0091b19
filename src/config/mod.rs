use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub staging: StagingConfig,
    pub warehouse: WarehouseConfig,
    pub forecast: ForecastConfig,
}

/// Source feed (EIA monthly crude oil production page)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Position of the production table in the page's table list.
    #[serde(default = "default_table_index")]
    pub table_index: usize,

    /// Years before this are unreliable in the source series and are dropped.
    #[serde(default = "default_min_year")]
    pub min_year: i32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Object-store staging area
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Root of the local object store (the "bucket").
    #[serde(default = "default_staging_root")]
    pub root: PathBuf,

    /// Object path the reshaped series is written to each run.
    #[serde(default = "default_object_path")]
    pub object_path: String,

    /// Prefix the warehouse bulk-loads from (every .csv under it).
    #[serde(default = "default_load_prefix")]
    pub load_prefix: String,

    /// Upper bound on waiting for the staged object to become visible.
    #[serde(default = "default_settle_timeout_secs")]
    pub settle_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Warehouse configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Model training + forecast sweep
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForecastConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_model_family")]
    pub family: crate::models::ModelFamily,

    #[serde(default = "default_seasonal_period")]
    pub seasonal_period: usize,

    #[serde(default = "default_holiday_region")]
    pub holiday_region: Option<String>,

    /// Months ahead to forecast, one sweep job per entry.
    #[serde(default = "default_horizons")]
    pub horizons: Vec<u32>,

    #[serde(default = "default_confidence_levels")]
    pub confidence_levels: Vec<f64>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_source_url() -> String {
    "https://www.eia.gov/dnav/pet/hist/LeafHandler.ashx?n=PET&s=MCRFPUS2&f=M".to_string()
}
fn default_table_index() -> usize {
    4
}
fn default_min_year() -> i32 {
    2002
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "oil-production-etl/0.1 (research pipeline; monthly series refresh)".to_string()
}
fn default_staging_root() -> PathBuf {
    PathBuf::from("data/staging")
}
fn default_object_path() -> String {
    "Pipeline/Production/Oil_Production.csv".to_string()
}
fn default_load_prefix() -> String {
    "Pipeline/Production".to_string()
}
fn default_settle_timeout_secs() -> u64 {
    15
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/oil_production.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_model_name() -> String {
    "oil_production_model".to_string()
}
fn default_model_family() -> crate::models::ModelFamily {
    crate::models::ModelFamily::MstlEts
}
fn default_seasonal_period() -> usize {
    12
}
fn default_holiday_region() -> Option<String> {
    Some("US".to_string())
}
fn default_horizons() -> Vec<u32> {
    vec![12, 24, 36, 48, 60]
}
fn default_confidence_levels() -> Vec<f64> {
    vec![0.80, 0.85, 0.90, 0.95]
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("OIL").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                url: default_source_url(),
                table_index: default_table_index(),
                min_year: default_min_year(),
                timeout_secs: default_timeout_secs(),
                request_delay_ms: default_request_delay_ms(),
                jitter_ms: default_jitter_ms(),
                max_retries: default_max_retries(),
                user_agent: default_user_agent(),
            },
            staging: StagingConfig {
                root: default_staging_root(),
                object_path: default_object_path(),
                load_prefix: default_load_prefix(),
                settle_timeout_secs: default_settle_timeout_secs(),
                poll_interval_ms: default_poll_interval_ms(),
            },
            warehouse: WarehouseConfig {
                db_path: default_db_path(),
                run_migrations: true,
            },
            forecast: ForecastConfig {
                model_name: default_model_name(),
                family: default_model_family(),
                seasonal_period: default_seasonal_period(),
                holiday_region: default_holiday_region(),
                horizons: default_horizons(),
                confidence_levels: default_confidence_levels(),
            },
        }
    }
}

use thiserror::Error;

/// Stage-level error taxonomy. Every variant aborts the run except where a
/// stage explicitly tolerates it (the loader's missing-table truncate).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source page could not be fetched (transport/HTTP failure).
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Source page layout did not match expectations (missing table, no Year column).
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// A cell value could not be converted (month abbreviation, year, volume).
    #[error("parse failed: {0}")]
    Parse(String),

    /// Staged object could not be written or never became visible.
    #[error("storage failed: {0}")]
    Storage(String),

    /// Warehouse truncate-and-reload failed.
    #[error("load failed: {0}")]
    Load(String),

    /// Model training failed (insufficient history, fit error).
    #[error("training failed: {0}")]
    Training(String),

    /// A forecast job failed (missing model, predict error).
    #[error("forecast failed: {0}")]
    Forecast(String),

    /// Reporting-table rebuild failed.
    #[error("reconcile failed: {0}")]
    Reconcile(String),
}

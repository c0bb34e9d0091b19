pub mod http_client;
pub mod parsers;

use crate::config::SourceConfig;
use crate::error::PipelineError;
use crate::models::RawSeriesTable;
use async_trait::async_trait;
use tracing::{debug, info};

use self::http_client::HttpClient;
use self::parsers::parse_nth_table;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable source-feed abstraction.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch_raw_table(&self) -> Result<RawSeriesTable, PipelineError>;
}

// ── EIA scraper ───────────────────────────────────────────────────────────────

pub struct EiaScraper {
    client: HttpClient,
    url: String,
    table_index: usize,
}

impl EiaScraper {
    pub fn new(config: &SourceConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: HttpClient::new(config)?,
            url: config.url.clone(),
            table_index: config.table_index,
        })
    }
}

#[async_trait]
impl SeriesSource for EiaScraper {
    async fn fetch_raw_table(&self) -> Result<RawSeriesTable, PipelineError> {
        info!("Fetching source page ({})", self.url);

        let html = self.client.get_text(&self.url).await?;
        let table = parse_nth_table(&html, self.table_index)?;

        debug!(
            "Table {}: {} columns, {} rows",
            self.table_index,
            table.headers.len(),
            table.rows.len()
        );
        Ok(table)
    }
}

use crate::config::SourceConfig;
use crate::error::PipelineError;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub struct HttpClient {
    inner: reqwest::Client,
    config: SourceConfig,
}

impl HttpClient {
    pub fn new(config: &SourceConfig) -> Result<Self, PipelineError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| PipelineError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    pub async fn get_text(&self, url: &str) -> Result<String, PipelineError> {
        self.polite_delay().await;

        let mut last_err = PipelineError::Fetch("no attempts made".into());

        for attempt in 1..=(self.config.max_retries + 1) {
            debug!("GET {} (attempt {})", url, attempt);

            match self.inner.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.map_err(|e| {
                            PipelineError::Fetch(format!("failed to read response body: {e}"))
                        });
                    } else if status.as_u16() == 429 || status.as_u16() == 503 {
                        // Rate limited — back off harder
                        let backoff = Duration::from_millis(
                            self.config.request_delay_ms * (2u64.pow(attempt)),
                        );
                        warn!(
                            "Rate limited ({}) on attempt {}, sleeping {:?}",
                            status, attempt, backoff
                        );
                        sleep(backoff).await;
                        last_err = PipelineError::Fetch(format!("HTTP {status}"));
                    } else {
                        last_err = PipelineError::Fetch(format!("HTTP error {status}"));
                        break; // Don't retry 4xx other than 429
                    }
                }
                Err(e) => {
                    last_err = PipelineError::Fetch(format!("request error: {e}"));
                    let backoff =
                        Duration::from_millis(self.config.request_delay_ms * u64::from(attempt));
                    warn!("Request failed on attempt {}: {}", attempt, e);
                    sleep(backoff).await;
                }
            }
        }

        match last_err {
            PipelineError::Fetch(msg) => Err(PipelineError::Fetch(format!(
                "all retries exhausted for {url}: {msg}"
            ))),
            other => Err(other),
        }
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        sleep(total).await;
    }
}

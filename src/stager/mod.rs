//! Stager: serialize the tidy series and publish it to object storage.
//!
//! The store trait is the pipeline's whole view of the storage collaborator:
//! put an object, check whether it is visible yet, and name a URI the
//! warehouse can bulk-load from. The local backend maps object paths to
//! files under a root directory; the warehouse reads them back via a glob.

use crate::error::PipelineError;
use crate::models::{Observation, UploadReceipt};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

// ── Object store trait ────────────────────────────────────────────────────────

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` at `path`, replacing any existing object.
    async fn put(&self, path: &str, body: &[u8]) -> Result<UploadReceipt, PipelineError>;

    /// Size of the object at `path`, or None while it is not yet visible.
    async fn head(&self, path: &str) -> Result<Option<u64>, PipelineError>;

    /// URI matching every .csv under `prefix`, in a form the warehouse can read.
    fn load_uri(&self, prefix: &str) -> String;
}

// ── Local filesystem backend ──────────────────────────────────────────────────

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, body: &[u8]) -> Result<UploadReceipt, PipelineError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Storage(format!("create {parent:?}: {e}")))?;
        }
        tokio::fs::write(&target, body)
            .await
            .map_err(|e| PipelineError::Storage(format!("write {target:?}: {e}")))?;

        Ok(UploadReceipt {
            path: path.to_string(),
            bytes: body.len() as u64,
        })
    }

    async fn head(&self, path: &str) -> Result<Option<u64>, PipelineError> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::Storage(format!("head {path}: {e}"))),
        }
    }

    fn load_uri(&self, prefix: &str) -> String {
        format!("{}/*.csv", self.root.join(prefix).display())
    }
}

// ── Serialization + upload ────────────────────────────────────────────────────

/// Render observations as the staged CSV: `Date,Oil_prod`, ISO dates.
pub fn to_csv(observations: &[Observation]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["Date", "Oil_prod"])
        .map_err(|e| PipelineError::Storage(format!("csv header: {e}")))?;

    for obs in observations {
        writer
            .write_record([
                obs.month.format("%Y-%m-%d").to_string(),
                obs.production.to_string(),
            ])
            .map_err(|e| PipelineError::Storage(format!("csv row {}: {e}", obs.month)))?;
    }

    writer
        .into_inner()
        .map_err(|e| PipelineError::Storage(format!("csv flush: {e}")))
}

/// Serialize and upload the run's series, overwriting the prior object.
pub async fn stage(
    store: &dyn ObjectStore,
    path: &str,
    observations: &[Observation],
) -> Result<UploadReceipt, PipelineError> {
    let body = to_csv(observations)?;
    let receipt = store.put(path, &body).await?;
    info!(
        "Staged {} rows ({} bytes) at {}",
        observations.len(),
        receipt.bytes,
        receipt.path
    );
    Ok(receipt)
}

/// Poll until the staged object is visible, bounded by `timeout`.
pub async fn wait_until_visible(
    store: &dyn ObjectStore,
    path: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), PipelineError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(bytes) = store.head(path).await? {
            debug!("{} visible ({} bytes)", path, bytes);
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PipelineError::Storage(format!(
                "{path} not visible after {timeout:?}"
            )));
        }
        sleep(poll_interval).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obs(y: i32, m: u32, v: i64) -> Observation {
        Observation {
            month: NaiveDate::from_ymd_opt(y, m, 1).unwrap(),
            production: v,
        }
    }

    #[test]
    fn csv_layout_matches_warehouse_schema() {
        let body = to_csv(&[obs(2023, 1, 100), obs(2023, 2, 250)]).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "Date,Oil_prod\n2023-01-01,100\n2023-02-01,250\n"
        );
    }

    #[tokio::test]
    async fn restaging_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let rows = vec![obs(2023, 1, 100)];

        let first = stage(&store, "Pipeline/Production/Oil_Production.csv", &rows)
            .await
            .unwrap();
        let second = stage(&store, "Pipeline/Production/Oil_Production.csv", &rows)
            .await
            .unwrap();

        assert_eq!(first, second);
        let on_disk = std::fs::read(
            dir.path().join("Pipeline/Production/Oil_Production.csv"),
        )
        .unwrap();
        assert_eq!(on_disk.len() as u64, second.bytes);
    }

    #[tokio::test]
    async fn visibility_poll_succeeds_once_staged() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        stage(&store, "a/b.csv", &[obs(2023, 1, 1)]).await.unwrap();

        wait_until_visible(
            &store,
            "a/b.csv",
            Duration::from_millis(200),
            Duration::from_millis(10),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn visibility_poll_times_out_on_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let err = wait_until_visible(
            &store,
            "never/written.csv",
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }

    #[test]
    fn load_uri_globs_the_prefix() {
        let store = LocalObjectStore::new("/data/bucket");
        assert_eq!(
            store.load_uri("Pipeline/Production"),
            "/data/bucket/Pipeline/Production/*.csv"
        );
    }
}

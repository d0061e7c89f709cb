// src/dataset/export.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::{DatasetService, LatestDataset};

pub const LATEST_FILE: &str = "latest.json";
pub const ARCHIVE_DIR: &str = "archive";

/// Sink the worker calls after every persisted run.
#[async_trait]
pub trait DatasetExporter: Send + Sync {
    async fn write_latest_snapshot(&self) -> Result<LatestDataset>;
}

/// Writes `<dir>/latest.json` plus a timestamped copy under `<dir>/archive/`.
#[derive(Clone)]
pub struct JsonExporter {
    export_dir: PathBuf,
    dataset: DatasetService,
}

/// `2024-05-01T12:30:00.123Z` -> `dataset-2024-05-01T12-30-00-123.json`
pub fn archive_file_name(generated_at: DateTime<Utc>) -> String {
    let stamp = generated_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let stamp = stamp.trim_end_matches('Z').replace([':', '.'], "-");
    format!("dataset-{stamp}.json")
}

impl JsonExporter {
    pub fn new(export_dir: impl Into<PathBuf>, dataset: DatasetService) -> Self {
        Self {
            export_dir: export_dir.into(),
            dataset,
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.export_dir.join(LATEST_FILE)
    }

    /// Last export on disk; `None` (with a warning) when missing or unreadable.
    pub async fn read_latest_from_disk(&self) -> Option<LatestDataset> {
        let path = self.latest_path();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = ?e, path = %path.display(), "no dataset export on disk");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(dataset) => Some(dataset),
            Err(e) => {
                tracing::warn!(error = ?e, path = %path.display(), "dataset export is not valid JSON");
                None
            }
        }
    }
}

#[async_trait]
impl DatasetExporter for JsonExporter {
    async fn write_latest_snapshot(&self) -> Result<LatestDataset> {
        let dataset = self.dataset.build_latest().await.context("building dataset")?;
        let body = serde_json::to_string_pretty(&dataset).context("serializing dataset")?;

        let archive_dir = self.export_dir.join(ARCHIVE_DIR);
        tokio::fs::create_dir_all(&archive_dir)
            .await
            .with_context(|| format!("creating {}", archive_dir.display()))?;

        let latest = self.latest_path();
        tokio::fs::write(&latest, &body)
            .await
            .with_context(|| format!("writing {}", latest.display()))?;
        let archived = archive_dir.join(archive_file_name(dataset.generated_at));
        tokio::fs::write(&archived, &body)
            .await
            .with_context(|| format!("writing {}", archived.display()))?;

        tracing::info!(
            sources = dataset.sources.len(),
            records = dataset.record_count(),
            path = %latest.display(),
            "dataset exported"
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn archive_name_has_no_colons_or_dots() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap() + chrono::Duration::milliseconds(123);
        assert_eq!(archive_file_name(t), "dataset-2024-05-01T12-30-00-123.json");
    }
}

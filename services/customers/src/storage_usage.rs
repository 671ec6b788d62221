//! Bucket usage report.
//!
//! Photos live two levels deep (`{customerId}/{millis}.jpg`), so the walk
//! lists the bucket root and then each top-level folder once. Deeper folders
//! are not descended into.

use crate::blob_store::{BlobError, BlobStore};
use crate::config::UsageConfig;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Storage consumed by the bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    /// Megabytes with two decimals, e.g. `"5.00"`
    #[serde(rename = "totalMB")]
    pub total_mb: String,
    #[serde(rename = "limitMB")]
    pub limit_mb: u64,
}

impl UsageReport {
    pub fn new(total_bytes: u64, limit_mb: u64) -> Self {
        Self {
            total_bytes,
            total_mb: format!("{:.2}", total_bytes as f64 / BYTES_PER_MB),
            limit_mb,
        }
    }

    /// Megabytes left before the quota, zero once exceeded
    pub fn remaining_mb(&self) -> f64 {
        (self.limit_mb as f64 - self.total_bytes as f64 / BYTES_PER_MB).max(0.0)
    }
}

/// Sums object sizes across the bucket
pub struct StorageUsageAggregator {
    blobs: Arc<dyn BlobStore>,
    limit_mb: u64,
    list_limit: usize,
}

impl StorageUsageAggregator {
    pub fn new(blobs: Arc<dyn BlobStore>, config: &UsageConfig) -> Self {
        Self {
            blobs,
            limit_mb: config.limit_mb,
            list_limit: config.list_limit,
        }
    }

    /// Walk the bucket; any listing failure aborts without a partial total
    #[instrument(skip(self))]
    pub async fn compute(&self) -> Result<UsageReport, BlobError> {
        let top_level = self.blobs.list("", self.list_limit).await?;

        let mut total_bytes: u64 = top_level.iter().filter_map(|e| e.size).sum();
        let mut folders = 0usize;

        for folder in top_level.iter().filter(|e| e.is_folder()) {
            let entries = self.blobs.list(&folder.name, self.list_limit).await?;
            total_bytes += entries.iter().filter_map(|e| e.size).sum::<u64>();
            folders += 1;
        }

        let report = UsageReport::new(total_bytes, self.limit_mb);
        let remaining_mb = report.remaining_mb();

        if remaining_mb <= 0.0 {
            warn!(total_bytes, limit_mb = self.limit_mb, "Storage quota exhausted");
        } else {
            debug!(total_bytes, folders, remaining_mb, "Storage usage computed");
        }

        Ok(report)
    }
}

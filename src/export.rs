//! Batch export of flow features to timestamped JSON artifacts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::models::FlowFeatures;

/// Writes batches of closed-flow features under one output directory and
/// tracks a monotonic exported-flow counter.
pub struct Exporter {
    out_dir: PathBuf,
    exported: AtomicU64,
    batches: AtomicU64,
}

impl Exporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            exported: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    /// Total flows exported so far across all batches.
    pub fn exported(&self) -> u64 {
        self.exported.load(Ordering::Relaxed)
    }

    /// Write one batch as a JSON array. An empty batch is a no-op and
    /// returns `Ok(None)`. Records are sorted by first-seen time for
    /// reproducible output. On any failure the batch is simply lost;
    /// callers log and move on, subsequent cycles are unaffected.
    pub fn export(&self, mut batch: Vec<FlowFeatures>) -> Result<Option<PathBuf>> {
        if batch.is_empty() {
            return Ok(None);
        }

        batch.sort_by(|a, b| a.first_seen.cmp(&b.first_seen));

        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("creating output directory {}", self.out_dir.display()))?;

        // Wall-clock stamp plus a per-process batch sequence so rapid
        // export cycles never collide on the same filename.
        let seq = self.batches.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.out_dir.join(format!("flows_live_{stamp}_{seq:04}.json"));

        let data = serde_json::to_vec_pretty(&batch).context("serializing flow batch")?;
        fs::write(&path, data)
            .with_context(|| format!("writing flow batch to {}", path.display()))?;

        self.exported.fetch_add(batch.len() as u64, Ordering::Relaxed);
        info!(flows = batch.len(), path = %path.display(), "exported flow batch");
        Ok(Some(path))
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

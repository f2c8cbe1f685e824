//! Eviction controller: decides when open flows become closed flows.
//!
//! One task serves both triggers — the periodic interval and the table's
//! capacity-pressure signal — so overlapping requests coalesce instead of
//! racing each other. Extraction and export only ever touch records already
//! removed from the table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::export::Exporter;
use crate::features::FeatureExtractor;
use crate::table::FlowTable;

pub struct Sweeper {
    table: Arc<FlowTable>,
    exporter: Arc<Exporter>,
    extractor: FeatureExtractor,
    flow_timeout: chrono::Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        table: Arc<FlowTable>,
        exporter: Arc<Exporter>,
        extractor: FeatureExtractor,
        flow_timeout_seconds: u64,
        export_interval_seconds: u64,
    ) -> Self {
        Self {
            table,
            exporter,
            extractor,
            flow_timeout: chrono::Duration::seconds(flow_timeout_seconds as i64),
            interval: Duration::from_secs(export_interval_seconds.max(1)),
        }
    }

    /// Drive periodic and pressure-triggered sweeps until `running` is
    /// cleared. The final shutdown flush is the caller's job.
    pub async fn run(&self, running: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; skip that first tick.
        ticker.tick().await;

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    let exported = self.sweep();
                    if exported > 0 {
                        info!(flows = exported, "periodic export");
                    }
                }
                _ = self.table.pressure().notified() => {
                    let exported = self.sweep();
                    debug!(flows = exported, "pressure-triggered sweep");
                }
            }
        }
    }

    /// Close every expired flow and export the batch. Returns the number
    /// of flows exported (0 when nothing expired — not an error).
    pub fn sweep(&self) -> usize {
        let drained = self.table.drain_expired(Utc::now(), self.flow_timeout);
        self.extract_and_export(drained)
    }

    /// Shutdown drain: close and export every open flow regardless of age.
    pub fn flush_all(&self) -> usize {
        let drained = self.table.drain_all();
        self.extract_and_export(drained)
    }

    fn extract_and_export(&self, drained: Vec<crate::models::FlowRecord>) -> usize {
        if drained.is_empty() {
            return 0;
        }
        let count = drained.len();
        let batch = drained.iter().map(|record| self.extractor.extract(record)).collect();

        // Export failures drop the batch; they never stall ingestion.
        if let Err(err) = self.exporter.export(batch) {
            error!(error = %err, flows = count, "flow export failed, batch dropped");
            return 0;
        }
        count
    }
}

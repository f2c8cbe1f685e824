//! Concurrent flow table.
//!
//! Exclusive owner of every open [`FlowRecord`]. All mutation happens under
//! one table-wide `RwLock`; a record is either reachable through the table
//! or owned by a draining caller, never both.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Notify;
use tracing::warn;

use crate::models::{FlowKey, FlowRecord, PacketEvent};

/// Hash table mapping 5-tuples to open flow accumulators.
pub struct FlowTable {
    flows: RwLock<HashMap<FlowKey, FlowRecord>>,
    /// Advisory capacity; exceeding it requests a sweep but never blocks
    /// or rejects ingestion.
    max_flows: usize,
    /// Single-slot capacity-pressure signal. Overlapping triggers coalesce
    /// into one stored permit, consumed by the sweeper task.
    pressure: Notify,
}

impl FlowTable {
    pub fn new(max_flows: usize) -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
            max_flows,
            pressure: Notify::new(),
        }
    }

    /// Fold one packet event into its flow, creating the flow on first
    /// sight of the key. Signals capacity pressure when the table has grown
    /// past `max_flows`; the signal is non-blocking and best-effort.
    pub fn ingest(&self, event: &PacketEvent) {
        let over_capacity = {
            let mut flows = self.flows.write().unwrap();
            match flows.get_mut(&event.key) {
                Some(record) => record.update(event),
                None => {
                    flows.insert(event.key.clone(), FlowRecord::new(event));
                }
            }
            flows.len() > self.max_flows
        };

        if over_capacity {
            warn!(max_flows = self.max_flows, "flow capacity exceeded, requesting sweep");
            self.pressure.notify_one();
        }
    }

    /// Number of currently open flows.
    pub fn count(&self) -> usize {
        self.flows.read().unwrap().len()
    }

    /// Signal awaited by the sweeper for capacity-triggered sweeps.
    pub fn pressure(&self) -> &Notify {
        &self.pressure
    }

    /// Atomically remove and return every flow idle longer than `timeout`
    /// at instant `now`. Removed records are exclusively owned by the
    /// caller; a later packet with the same key starts a fresh flow.
    pub fn drain_expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<FlowRecord> {
        let mut flows = self.flows.write().unwrap();
        let expired: Vec<FlowKey> = flows
            .iter()
            .filter(|(_, record)| now.signed_duration_since(record.last_seen) > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| flows.remove(&key))
            .collect()
    }

    /// Remove and return every open flow regardless of age. Used for the
    /// shutdown flush; the table is empty afterwards.
    pub fn drain_all(&self) -> Vec<FlowRecord> {
        let mut flows = self.flows.write().unwrap();
        flows.drain().map(|(_, record)| record).collect()
    }
}

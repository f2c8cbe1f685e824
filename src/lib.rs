//! flowsniff: per-flow network feature extraction for DNS-tunneling and
//! exfiltration analytics.
//!
//! Packets are normalized into [`PacketEvent`]s by the capture layer
//! ([`sniff`]), aggregated per 5-tuple in the [`FlowTable`], closed by the
//! [`Sweeper`] (inactivity timeout, capacity pressure or shutdown), turned
//! into [`FlowFeatures`] by the [`FeatureExtractor`] and written out as
//! timestamped JSON batches by the [`Exporter`].

pub mod config;
pub mod export;
pub mod features;
pub mod models;
pub mod sniff;
pub mod stats;
pub mod sweeper;
pub mod table;

pub use config::Config;
pub use export::Exporter;
pub use features::FeatureExtractor;
pub use models::{DnsInfo, FlowFeatures, FlowKey, FlowRecord, PacketEvent, Protocol};
pub use sweeper::Sweeper;
pub use table::FlowTable;

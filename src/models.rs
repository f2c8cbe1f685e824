//! Core data types: packet events, flow keys, flow accumulators and the
//! exported feature record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stats;

/// Recognized transport protocols. Anything else is dropped at capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

/// 5-tuple identity of a flow.
///
/// Equality and hashing are positional: the two directions of a connection
/// are tracked as two distinct flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
}

/// One normalized packet, as produced by the capture layer.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub timestamp: DateTime<Utc>,
    pub length: usize,
    pub key: FlowKey,
    /// First DNS question name, when the packet carried one.
    pub dns_query: Option<String>,
}

/// Lexical features of the first DNS query observed on a flow.
#[derive(Debug, Clone)]
pub struct DnsInfo {
    pub query: String,
    pub query_length: usize,
    pub subdomain_depth: usize,
    pub entropy: f64,
}

impl DnsInfo {
    fn from_query(query: &str) -> Self {
        Self {
            query: query.to_string(),
            query_length: query.chars().count(),
            subdomain_depth: stats::subdomain_depth(query),
            entropy: stats::shannon_entropy(query),
        }
    }
}

/// Mutable per-flow accumulator, owned by the flow table while open.
///
/// Invariants: `packet_count == packet_sizes.len() == timestamps.len()`,
/// `total_bytes == packet_sizes.iter().sum()`, `last_seen >= first_seen`.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub key: FlowKey,
    pub packet_count: u64,
    pub total_bytes: u64,
    pub packet_sizes: Vec<usize>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub dns: Option<DnsInfo>,
}

impl FlowRecord {
    pub fn new(event: &PacketEvent) -> Self {
        let mut record = Self {
            key: event.key.clone(),
            packet_count: 0,
            total_bytes: 0,
            packet_sizes: Vec::with_capacity(100),
            timestamps: Vec::with_capacity(100),
            first_seen: event.timestamp,
            last_seen: event.timestamp,
            dns: None,
        };
        record.update(event);
        record
    }

    /// Fold one packet event into the accumulator.
    pub fn update(&mut self, event: &PacketEvent) {
        self.packet_count += 1;
        self.total_bytes += event.length as u64;
        self.packet_sizes.push(event.length);
        self.timestamps.push(event.timestamp);
        self.last_seen = event.timestamp;

        // First non-empty query wins; later queries on the flow are ignored.
        if self.dns.is_none() {
            if let Some(query) = event.dns_query.as_deref() {
                if !query.is_empty() {
                    self.dns = Some(DnsInfo::from_query(query));
                }
            }
        }
    }
}

/// Immutable feature vector derived from a closed flow. This is the only
/// artifact that crosses into the exporter.
#[derive(Debug, Clone, Serialize)]
pub struct FlowFeatures {
    // Identity
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,

    // Timestamps (RFC 3339, nanosecond precision)
    pub first_seen: String,
    pub last_seen: String,

    // Basic features
    pub packet_count: u64,
    pub duration: f64,
    pub total_bytes: u64,
    pub avg_packet_size: f64,

    // Temporal features
    pub min_iat: f64,
    pub max_iat: f64,
    pub mean_iat: f64,
    pub std_iat: f64,

    // Rate features
    pub bytes_per_second: f64,
    pub packets_per_second: f64,
    pub avg_bytes_per_packet: f64,

    // DNS features
    pub dns_query_length: usize,
    pub dns_subdomain_depth: usize,
    pub dns_entropy: f64,
}

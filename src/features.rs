//! Feature extraction: closed [`FlowRecord`] to immutable [`FlowFeatures`].

use crate::models::{FlowFeatures, FlowRecord};
use crate::stats;

/// Deterministic, side-effect-free extractor. Must only be handed records
/// already removed from the flow table.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    dns: bool,
    temporal: bool,
    rate: bool,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self { dns: true, temporal: true, rate: true }
    }
}

impl FeatureExtractor {
    pub fn new(dns: bool, temporal: bool, rate: bool) -> Self {
        Self { dns, temporal, rate }
    }

    pub fn extract(&self, record: &FlowRecord) -> FlowFeatures {
        // Duration floored at 0 so a non-monotonic capture clock cannot
        // produce a negative span.
        let duration = seconds_between(record.first_seen, record.last_seen).max(0.0);

        // packet_count >= 1 for any record the table ever created.
        let avg_packet_size = record.total_bytes as f64 / record.packet_count as f64;

        let (min_iat, max_iat, mean_iat, std_iat) = if self.temporal {
            self.iat_stats(record)
        } else {
            (0.0, 0.0, 0.0, 0.0)
        };

        let (bytes_per_second, packets_per_second, avg_bytes_per_packet) = if self.rate {
            let (bps, pps) = if duration > 0.0 {
                (record.total_bytes as f64 / duration, record.packet_count as f64 / duration)
            } else {
                (0.0, 0.0)
            };
            (stats::round_to(bps, 2), stats::round_to(pps, 2), stats::round_to(avg_packet_size, 2))
        } else {
            (0.0, 0.0, 0.0)
        };

        let (dns_query_length, dns_subdomain_depth, dns_entropy) = match &record.dns {
            Some(dns) if self.dns => {
                (dns.query_length, dns.subdomain_depth, stats::round_to(dns.entropy, 4))
            }
            _ => (0, 0, 0.0),
        };

        FlowFeatures {
            src_ip: record.key.src_ip.clone(),
            dst_ip: record.key.dst_ip.clone(),
            src_port: record.key.src_port,
            dst_port: record.key.dst_port,
            protocol: record.key.protocol.as_str().to_string(),
            first_seen: format_instant(record.first_seen),
            last_seen: format_instant(record.last_seen),
            packet_count: record.packet_count,
            duration: stats::round_to(duration, 6),
            total_bytes: record.total_bytes,
            avg_packet_size: stats::round_to(avg_packet_size, 2),
            min_iat,
            max_iat,
            mean_iat,
            std_iat,
            bytes_per_second,
            packets_per_second,
            avg_bytes_per_packet,
            dns_query_length,
            dns_subdomain_depth,
            dns_entropy,
        }
    }

    fn iat_stats(&self, record: &FlowRecord) -> (f64, f64, f64, f64) {
        if record.timestamps.len() < 2 {
            return (0.0, 0.0, 0.0, 0.0);
        }
        // Gaps clipped at 0: out-of-order delivery must not yield negative
        // inter-arrival times.
        let iats: Vec<f64> = record
            .timestamps
            .windows(2)
            .map(|pair| seconds_between(pair[0], pair[1]).max(0.0))
            .collect();

        (
            stats::round_to(stats::min(&iats), 6),
            stats::round_to(stats::max(&iats), 6),
            stats::round_to(stats::mean(&iats), 6),
            stats::round_to(stats::population_std(&iats), 6),
        )
    }
}

fn seconds_between(a: chrono::DateTime<chrono::Utc>, b: chrono::DateTime<chrono::Utc>) -> f64 {
    (b.timestamp_micros() - a.timestamp_micros()) as f64 / 1e6
}

fn format_instant(t: chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

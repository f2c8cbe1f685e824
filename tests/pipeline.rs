//! End-to-end pipeline test: ingest packet events, sweep the table and
//! check the exported artifact.

use std::fs;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use flowsniff::{
    Exporter, FeatureExtractor, FlowKey, FlowTable, PacketEvent, Protocol, Sweeper,
};

fn dns_event(src_port: u16, secs: i64, length: usize, query: Option<&str>) -> PacketEvent {
    PacketEvent {
        timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        length,
        key: FlowKey {
            src_ip: "10.0.0.5".into(),
            dst_ip: "8.8.4.4".into(),
            src_port,
            dst_port: 53,
            protocol: Protocol::Udp,
        },
        dns_query: query.map(str::to_string),
    }
}

#[test]
fn ingest_sweep_export_roundtrip() {
    let dir = TempDir::new().unwrap();
    let table = Arc::new(FlowTable::new(10_000));
    let exporter = Arc::new(Exporter::new(dir.path()));
    let sweeper = Sweeper::new(
        Arc::clone(&table),
        Arc::clone(&exporter),
        FeatureExtractor::default(),
        5,
        30,
    );

    // One DNS flow with three packets at t = 0, 1, 3.
    table.ingest(&dns_event(40000, 0, 100, Some("payload.tunnel.example.com")));
    table.ingest(&dns_event(40000, 1, 100, None));
    table.ingest(&dns_event(40000, 3, 100, None));
    // A second flow, single packet.
    table.ingest(&dns_event(40001, 2, 60, None));

    assert_eq!(table.count(), 2);

    // Everything is long idle relative to wall clock, so a sweep closes both.
    let exported = sweeper.sweep();
    assert_eq!(exported, 2);
    assert_eq!(table.count(), 0);
    assert_eq!(exporter.exported(), 2);

    let artifacts: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(artifacts.len(), 1);

    let parsed: serde_json::Value =
        serde_json::from_slice(&fs::read(&artifacts[0]).unwrap()).unwrap();
    let records = parsed.as_array().unwrap();
    assert_eq!(records.len(), 2);

    // Sorted by first_seen: the three-packet flow started at t=0.
    let flow = &records[0];
    assert_eq!(flow["src_port"], 40000);
    assert_eq!(flow["packet_count"], 3);
    assert_eq!(flow["total_bytes"], 300);
    assert_eq!(flow["duration"], 3.0);
    assert_eq!(flow["min_iat"], 1.0);
    assert_eq!(flow["max_iat"], 2.0);
    assert_eq!(flow["mean_iat"], 1.5);
    assert_eq!(flow["std_iat"], 0.5);
    assert_eq!(flow["dns_query_length"], 26);
    assert_eq!(flow["dns_subdomain_depth"], 3);
    assert!(flow["dns_entropy"].as_f64().unwrap() > 0.0);

    let single = &records[1];
    assert_eq!(single["src_port"], 40001);
    assert_eq!(single["packet_count"], 1);
    assert_eq!(single["duration"], 0.0);
    assert_eq!(single["bytes_per_second"], 0.0);
    assert_eq!(single["dns_query_length"], 0);
}

#[test]
fn fresh_flow_after_drain_exports_separately() {
    let dir = TempDir::new().unwrap();
    let table = Arc::new(FlowTable::new(10_000));
    let exporter = Arc::new(Exporter::new(dir.path()));
    let sweeper = Sweeper::new(
        Arc::clone(&table),
        Arc::clone(&exporter),
        FeatureExtractor::default(),
        5,
        30,
    );

    table.ingest(&dns_event(40000, 0, 100, None));
    assert_eq!(sweeper.flush_all(), 1);

    // Same key again after closing: a brand-new flow.
    table.ingest(&dns_event(40000, 100, 40, None));
    assert_eq!(sweeper.flush_all(), 1);
    assert_eq!(exporter.exported(), 2);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn expired_selection_uses_last_seen() {
    let table = FlowTable::new(10_000);
    let timeout = Duration::seconds(5);

    table.ingest(&dns_event(40000, 0, 100, None));
    table.ingest(&dns_event(40001, 4, 100, None));

    let now = Utc.timestamp_opt(6, 0).unwrap();
    let drained = table.drain_expired(now, timeout);
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].key.src_port, 40000);
    assert_eq!(table.count(), 1);
}

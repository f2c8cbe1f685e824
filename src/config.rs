//! Collector configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture interface for live mode.
    pub interface: String,
    pub snapshot_length: i32,
    pub promiscuous_mode: bool,
    /// pcap read timeout in milliseconds.
    pub timeout_ms: i32,
    /// BPF filter applied to the capture handle.
    pub bpf_filter: String,

    /// Inactivity timeout after which a flow is closed (seconds).
    pub flow_timeout_seconds: u64,
    /// Advisory cap on open flows; exceeding it triggers a sweep.
    pub max_flows_in_memory: usize,
    /// Periodic export sweep interval (seconds).
    pub export_interval_seconds: u64,
    pub output_directory: PathBuf,

    /// Feature-group toggles; a disabled group exports zeroed fields.
    pub enable_dns_features: bool,
    pub enable_temporal_features: bool,
    pub enable_rate_features: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            snapshot_length: 1600,
            promiscuous_mode: false,
            timeout_ms: 500,
            bpf_filter: "tcp or udp".to_string(),
            flow_timeout_seconds: 60,
            max_flows_in_memory: 100_000,
            export_interval_seconds: 30,
            output_directory: PathBuf::from("./flows"),
            enable_dns_features: true,
            enable_temporal_features: true,
            enable_rate_features: true,
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults, a malformed
    /// file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }
}

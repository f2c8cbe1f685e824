use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tokio::time;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use flowsniff::config::Config;
use flowsniff::export::Exporter;
use flowsniff::features::FeatureExtractor;
use flowsniff::models::PacketEvent;
use flowsniff::sniff::{self, CaptureSource, CaptureStats};
use flowsniff::sweeper::Sweeper;
use flowsniff::table::FlowTable;

#[derive(Parser, Debug)]
#[command(name = "flowsniff", about = "Per-flow network feature collector")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Read from a pcap file instead of live capture.
    #[arg(long)]
    pcap: Option<PathBuf>,

    /// Override the capture interface from the config.
    #[arg(long)]
    interface: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(interface) = args.interface {
        config.interface = interface;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "flowsniff collector starting");

    let table = Arc::new(FlowTable::new(config.max_flows_in_memory));
    let exporter = Arc::new(Exporter::new(config.output_directory.clone()));
    let extractor = FeatureExtractor::new(
        config.enable_dns_features,
        config.enable_temporal_features,
        config.enable_rate_features,
    );
    let sweeper = Arc::new(Sweeper::new(
        Arc::clone(&table),
        Arc::clone(&exporter),
        extractor,
        config.flow_timeout_seconds,
        config.export_interval_seconds,
    ));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("installing shutdown handler")?;
    }

    let (tx, rx) = unbounded();
    let stats = Arc::new(CaptureStats::default());

    let source = match &args.pcap {
        Some(path) => {
            info!(path = %path.display(), "reading from pcap file");
            CaptureSource::File(path.clone())
        }
        None => {
            info!(interface = %config.interface, filter = %config.bpf_filter, "starting live capture");
            CaptureSource::Interface(config.interface.clone())
        }
    };

    let capture_thread = {
        let config = config.clone();
        let stats = Arc::clone(&stats);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            if let Err(err) = sniff::run(&config, source, tx, stats, Arc::clone(&running)) {
                error!(error = %err, "packet capture failed");
            }
            // Capture is done (end of file or error): stop the pipeline.
            running.store(false, Ordering::SeqCst);
        })
    };

    {
        let sweeper = Arc::clone(&sweeper);
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            sweeper.run(running).await;
        });
    }
    tokio::spawn(display_stats(
        Arc::clone(&stats),
        Arc::clone(&table),
        Arc::clone(&exporter),
        Arc::clone(&running),
    ));

    info!("collector started, press Ctrl+C to stop");

    let ingest = {
        let table = Arc::clone(&table);
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || process_events(rx, &table, &running))
    };
    ingest.await.context("ingest loop panicked")?;

    info!("exporting remaining flows");
    let flushed = sweeper.flush_all();
    if flushed > 0 {
        info!(flows = flushed, "shutdown flush");
    }

    capture_thread.join().ok();
    display_final_stats(&stats, &exporter);
    info!("collector stopped");
    Ok(())
}

/// Pull packet events off the capture channel into the flow table until
/// shutdown or the channel closes.
fn process_events(rx: Receiver<PacketEvent>, table: &FlowTable, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => table.ingest(&event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Drain whatever the capture thread managed to queue before stopping.
    while let Ok(event) = rx.try_recv() {
        table.ingest(&event);
    }
}

async fn display_stats(
    stats: Arc<CaptureStats>,
    table: Arc<FlowTable>,
    exporter: Arc<Exporter>,
    running: Arc<AtomicBool>,
) {
    let mut interval = time::interval(Duration::from_secs(10));
    interval.tick().await;
    while running.load(Ordering::SeqCst) {
        interval.tick().await;
        info!(
            packets = stats.total_packets.load(Ordering::Relaxed),
            tcp = stats.tcp_packets.load(Ordering::Relaxed),
            udp = stats.udp_packets.load(Ordering::Relaxed),
            dns = stats.dns_packets.load(Ordering::Relaxed),
            dropped = stats.dropped_packets.load(Ordering::Relaxed),
            active_flows = table.count(),
            exported = exporter.exported(),
            "stats"
        );
    }
}

fn display_final_stats(stats: &CaptureStats, exporter: &Exporter) {
    info!("═══════════════════════════════════════════");
    info!("  FINAL STATISTICS");
    info!("═══════════════════════════════════════════");
    info!("  Total Packets:    {}", stats.total_packets.load(Ordering::Relaxed));
    info!("  TCP Packets:      {}", stats.tcp_packets.load(Ordering::Relaxed));
    info!("  UDP Packets:      {}", stats.udp_packets.load(Ordering::Relaxed));
    info!("  DNS Packets:      {}", stats.dns_packets.load(Ordering::Relaxed));
    info!("  Dropped Packets:  {}", stats.dropped_packets.load(Ordering::Relaxed));
    info!("  Exported Flows:   {}", exporter.exported());
    info!("═══════════════════════════════════════════");
}

//! Packet capture and parsing: turns raw pcap packets into normalized
//! [`PacketEvent`]s for the flow table.
//!
//! Only TCP/UDP over IPv4/IPv6 makes it through; everything else is
//! counted as dropped. UDP port-53 payloads additionally get the first
//! DNS question name decoded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pcap::{Activated, Capture, Device};

use crate::config::Config;
use crate::models::{FlowKey, PacketEvent, Protocol};

const DNS_PORT: u16 = 53;

/// Where packets come from.
pub enum CaptureSource {
    Interface(String),
    File(PathBuf),
}

/// Runtime capture counters, shared with the statistics display.
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub total_packets: AtomicU64,
    pub tcp_packets: AtomicU64,
    pub udp_packets: AtomicU64,
    pub dns_packets: AtomicU64,
    pub dropped_packets: AtomicU64,
}

/// Capture loop: reads packets until `running` is cleared or the source is
/// exhausted, pushing accepted events into the channel.
pub fn run(
    config: &Config,
    source: CaptureSource,
    sender: Sender<PacketEvent>,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let mut cap = open_capture(config, source)?;
    cap.filter(&config.bpf_filter, true)
        .context("applying BPF filter")?;

    while running.load(Ordering::SeqCst) {
        match cap.next_packet() {
            Ok(packet) => {
                stats.total_packets.fetch_add(1, Ordering::Relaxed);

                let timestamp = packet_timestamp(&packet);
                let wire_len = packet.header.len as usize;

                match parse_packet(packet.data, timestamp, wire_len) {
                    Some(event) => {
                        match event.key.protocol {
                            Protocol::Tcp => {
                                stats.tcp_packets.fetch_add(1, Ordering::Relaxed);
                            }
                            Protocol::Udp => {
                                stats.udp_packets.fetch_add(1, Ordering::Relaxed);
                                if event.key.src_port == DNS_PORT
                                    || event.key.dst_port == DNS_PORT
                                {
                                    stats.dns_packets.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        if sender.send(event).is_err() {
                            // Receiver is gone; the pipeline is shutting down.
                            break;
                        }
                    }
                    None => {
                        stats.dropped_packets.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(err) => return Err(err).context("packet capture"),
        }
    }
    Ok(())
}

fn open_capture(config: &Config, source: CaptureSource) -> Result<Capture<dyn Activated>> {
    match source {
        CaptureSource::File(path) => {
            let cap = Capture::from_file(&path)
                .with_context(|| format!("opening pcap file {}", path.display()))?;
            Ok(cap.into())
        }
        CaptureSource::Interface(name) => {
            let device = if name.is_empty() {
                Device::lookup()
                    .context("looking up default capture device")?
                    .context("no capture device available")?
            } else {
                Device::from(name.as_str())
            };
            let cap = Capture::from_device(device)
                .context("opening capture device")?
                .promisc(config.promiscuous_mode)
                .snaplen(config.snapshot_length)
                .timeout(config.timeout_ms)
                .immediate_mode(true)
                .open()
                .context("activating capture")?;
            Ok(cap.into())
        }
    }
}

fn packet_timestamp(packet: &pcap::Packet) -> DateTime<Utc> {
    let secs = packet.header.ts.tv_sec as i64;
    let nanos = (packet.header.ts.tv_usec.max(0) as u32).saturating_mul(1000);
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
}

/// Slice an ethernet frame down to a flow event. Returns `None` for
/// anything that is not TCP or UDP over IP.
fn parse_packet(data: &[u8], timestamp: DateTime<Utc>, wire_len: usize) -> Option<PacketEvent> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_ip, dst_ip) = match sliced.ip? {
        InternetSlice::Ipv4(header, _) => (
            header.source_addr().to_string(),
            header.destination_addr().to_string(),
        ),
        InternetSlice::Ipv6(header, _) => (
            header.source_addr().to_string(),
            header.destination_addr().to_string(),
        ),
    };

    let (protocol, src_port, dst_port) = match sliced.transport? {
        TransportSlice::Tcp(tcp) => (Protocol::Tcp, tcp.source_port(), tcp.destination_port()),
        TransportSlice::Udp(udp) => (Protocol::Udp, udp.source_port(), udp.destination_port()),
        _ => return None,
    };

    let dns_query = if protocol == Protocol::Udp && (src_port == DNS_PORT || dst_port == DNS_PORT)
    {
        dns_query_name(sliced.payload)
    } else {
        None
    };

    Some(PacketEvent {
        timestamp,
        length: wire_len,
        key: FlowKey {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        },
        dns_query,
    })
}

/// Decode the first question name from a raw DNS message. Question
/// sections never use compression pointers, so plain labels suffice.
fn dns_query_name(payload: &[u8]) -> Option<String> {
    const HEADER_LEN: usize = 12;
    if payload.len() < HEADER_LEN {
        return None;
    }
    let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
    if qdcount == 0 {
        return None;
    }

    let mut pos = HEADER_LEN;
    let mut labels: Vec<String> = Vec::new();
    loop {
        let len = *payload.get(pos)? as usize;
        if len == 0 {
            break;
        }
        if len & 0xC0 != 0 {
            return None;
        }
        pos += 1;
        let label = payload.get(pos..pos + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += len;
    }

    (!labels.is_empty()).then(|| labels.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    /// DNS query message with one question for `name`.
    fn dns_message(name: &str) -> Vec<u8> {
        let mut msg = vec![
            0x12, 0x34, // id
            0x01, 0x00, // flags: standard query, rd
            0x00, 0x01, // qdcount
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // an/ns/ar counts
        ];
        for label in name.split('.') {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.push(0);
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // qtype A, qclass IN
        msg
    }

    fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 1], [8, 8, 8, 8], 64)
            .udp(src_port, dst_port);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    #[test]
    fn decodes_first_question_name() {
        let msg = dns_message("tunnel.data.example.com");
        assert_eq!(dns_query_name(&msg).as_deref(), Some("tunnel.data.example.com"));
    }

    #[test]
    fn rejects_truncated_or_empty_messages() {
        assert_eq!(dns_query_name(&[]), None);
        assert_eq!(dns_query_name(&[0u8; 11]), None);
        // Header claims a question but the section is missing.
        let mut msg = dns_message("a.example.com");
        msg.truncate(14);
        assert_eq!(dns_query_name(&msg), None);
    }

    #[test]
    fn rejects_zero_question_count() {
        let mut msg = dns_message("a.example.com");
        msg[5] = 0;
        assert_eq!(dns_query_name(&msg), None);
    }

    #[test]
    fn parses_udp_dns_packet_into_event() {
        let frame = udp_frame(40000, 53, &dns_message("exfil.example.com"));
        let now = Utc::now();
        let event = parse_packet(&frame, now, frame.len()).expect("parsed");

        assert_eq!(event.key.src_ip, "10.0.0.1");
        assert_eq!(event.key.dst_ip, "8.8.8.8");
        assert_eq!(event.key.src_port, 40000);
        assert_eq!(event.key.dst_port, 53);
        assert_eq!(event.key.protocol, Protocol::Udp);
        assert_eq!(event.dns_query.as_deref(), Some("exfil.example.com"));
        assert_eq!(event.length, frame.len());
        assert_eq!(event.timestamp, now);
    }

    #[test]
    fn non_dns_udp_has_no_query() {
        let frame = udp_frame(40000, 123, b"ntp-ish payload");
        let event = parse_packet(&frame, Utc::now(), frame.len()).expect("parsed");
        assert_eq!(event.dns_query, None);
    }

    #[test]
    fn tcp_packet_maps_to_tcp_protocol() {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 10], [93, 184, 216, 34], 64)
            .tcp(50000, 443, 1000, 64000);
        let payload = b"tls hello";
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();

        let event = parse_packet(&frame, Utc::now(), frame.len()).expect("parsed");
        assert_eq!(event.key.protocol, Protocol::Tcp);
        assert_eq!(event.key.dst_port, 443);
        assert_eq!(event.dns_query, None);
    }

    #[test]
    fn non_ip_frame_is_dropped() {
        // ARP ethertype with junk payload.
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06;
        frame.extend_from_slice(&[0u8; 28]);
        assert!(parse_packet(&frame, Utc::now(), frame.len()).is_none());
    }
}

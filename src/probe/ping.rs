//! Latency probe: native ICMP echo with a `ping` command fallback.
//!
//! The result is informational only. Callers treat any error as "no
//! latency sample" and never as the target being down.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Per-family ICMP parameters.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// IPv4 raw sockets hand back the IP header too.
    may_include_ip_header: bool,
}

const ECHO_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    may_include_ip_header: true,
};

const ECHO_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    may_include_ip_header: false,
};

fn detect_icmp_capability() -> IcmpCapability {
    let raw = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok();
    let native = raw || Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok();

    if native {
        tracing::info!("Ping probe: using native ICMP ({})", if raw { "raw" } else { "datagram" });
        IcmpCapability::Native
    } else {
        tracing::info!("Ping probe: native ICMP unavailable, using ping command");
        IcmpCapability::CommandOnly
    }
}

/// Measure round-trip latency to `host` in milliseconds.
pub async fn run_ping_probe(host: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_host(host).await?;
        let result = tokio::task::spawn_blocking(move || blocking_echo(ip, timeout))
            .await
            .map_err(|e| ProbeError::Transport(format!("ping task failed: {}", e)))?;

        match result {
            Err(ProbeError::Transport(msg))
                if msg.contains("Permission") || msg.contains("not permitted") =>
            {
                tracing::warn!(
                    "Ping probe: native ICMP refused for {}, using ping command: {}",
                    host,
                    msg
                );
            }
            other => return other,
        }
    }

    run_ping_command(host, timeout).await
}

async fn resolve_host(host: &str) -> Result<IpAddr, ProbeError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Transport(format!("DNS resolution failed: {}", e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Transport(format!("no addresses found for {}", host)))
}

fn blocking_echo(ip: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
    let family = match ip {
        IpAddr::V4(_) => &ECHO_V4,
        IpAddr::V6(_) => &ECHO_V6,
    };

    let (socket, raw) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
            .map(|socket| (socket, false))
            .map_err(|e| ProbeError::Transport(format!("failed to create ICMP socket: {}", e)))?,
    };

    socket
        .set_read_timeout(Some(timeout))
        .and_then(|_| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| ProbeError::Transport(format!("failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Transport(format!("failed to connect: {}", e)))?;

    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(family.request_type, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Transport(format!("Permission denied: {}", e))
        } else {
            ProbeError::Transport(format!("failed to send: {}", e))
        }
    })?;

    loop {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => ProbeError::Transport(format!("failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();
        // SAFETY: recv initialized the first `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // Datagram sockets get their identifier rewritten by the kernel
        let expected_id = raw.then_some(identifier);
        if is_matching_reply(buf, family, expected_id, sequence) {
            return Ok(elapsed.as_secs_f64() * 1000.0);
        }
    }
}

fn is_matching_reply(
    buf: &[u8],
    family: &EchoFamily,
    identifier: Option<u16>,
    sequence: u16,
) -> bool {
    let offset = if family.may_include_ip_header && buf.first().map(|b| b >> 4) == Some(4) {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };

    match buf.get(offset..offset + 8) {
        Some(icmp) => {
            icmp[0] == family.reply_type
                && identifier.map_or(true, |id| u16::from_be_bytes([icmp[4], icmp[5]]) == id)
                && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
        }
        None => false,
    }
}

/// Echo request with a 56 byte payload. The checksum is filled in for
/// ICMPv4; the kernel computes it for ICMPv6.
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(&rand::random::<u64>().to_be_bytes());

    if request_type == ECHO_V4.request_type {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])))
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

async fn run_ping_command(host: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1).to_string();
    let args: Vec<&str> = if cfg!(windows) {
        vec!["-n", "1", "-w", "1000", host]
    } else {
        vec!["-c", "1", "-W", &timeout_secs, host]
    };

    let output = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        Command::new("ping")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProbeError::Timeout(timeout))?
    .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout.trim())));
    }

    parse_ping_output(&stdout)
}

/// Latency in milliseconds from `ping` output (Linux, macOS or Windows).
fn parse_ping_output(output: &str) -> Result<f64, ProbeError> {
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<]\s*(?P<val>[0-9.]+)\s*ms").expect("valid ping regex"));
    if let Some(ms) = per_packet
        .captures(output)
        .and_then(|c| c.name("val"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Ok(ms);
    }

    // "rtt min/avg/max/mdev = a/b/c/d ms" or "round-trip min/avg/max/stddev = ..."
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(concat!(
            r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)",
            r"\s*=\s*[0-9.]+/(?P<avg>[0-9.]+)/"
        ))
        .expect("valid ping regex")
    });
    summary
        .captures(output)
        .and_then(|c| c.name("avg"))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_validates() {
        let packet = build_echo_request(8, 0x1234, 1);
        // A packet carrying its own checksum sums to zero
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_request() {
        let packet = build_echo_request(128, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[2..4], [0, 0]);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
    }

    #[test]
    fn test_matching_reply_skips_ip_header() {
        let mut raw = vec![0x45u8; 20];
        raw.extend_from_slice(&[0, 0, 0, 0, 0x12, 0x34, 0x00, 0x07]);
        assert!(is_matching_reply(&raw, &ECHO_V4, Some(0x1234), 7));
        assert!(!is_matching_reply(&raw, &ECHO_V4, Some(0x1234), 8));
        assert!(!is_matching_reply(&raw, &ECHO_V4, Some(0x4321), 7));

        let dgram = [0u8, 0, 0, 0, 0x99, 0x99, 0x00, 0x07];
        assert!(is_matching_reply(&dgram, &ECHO_V4, None, 7));
        assert!(!is_matching_reply(&dgram[..4], &ECHO_V4, None, 7));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        assert!((parse_ping_output(output).unwrap() - 12.345).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_windows() {
        let output = "Reply from 8.8.8.8: bytes=32 time=14ms TTL=117";
        assert_eq!(parse_ping_output(output).unwrap(), 14.0);
        let output = "Reply from 127.0.0.1: bytes=32 time<1ms TTL=128";
        assert_eq!(parse_ping_output(output).unwrap(), 1.0);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        assert!((parse_ping_output(output).unwrap() - 17.906).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(matches!(parse_ping_output("no reply"), Err(ProbeError::Command(_))));
    }
}

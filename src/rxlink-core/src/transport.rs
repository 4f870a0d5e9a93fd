// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Outgoing UDP sample-stream transport: destination, framing header and
//! payload sizing.

use std::fmt;

use crate::DynResult;

/// Bytes per complex sample on the wire (16-bit I + 16-bit Q).
pub const SAMPLE_BYTES: usize = 4;
/// Largest UDP payload: 65536 minus IP/UDP overhead.
pub const MAX_UDP_PAYLOAD: usize = 65_536 - 29;
pub const PAYLOAD_ALIGN: usize = 512;
/// Ceiling for the sample payload of one datagram (65024 bytes).
pub const MAX_PAYLOAD_SIZE: usize = (MAX_UDP_PAYLOAD / PAYLOAD_ALIGN) * PAYLOAD_ALIGN;
pub const DEFAULT_SAMPLES_PER_PACKET: usize = 4096;
pub const DEFAULT_STREAM_PORT: u16 = 28888;

/// Host placeholder meaning "the address of whoever asked".
pub const REQUESTER_HOST: &str = "-";

/// Payload size in bytes for a number of samples per packet, clipped to the
/// UDP ceiling.
pub fn payload_size_for(samples_per_packet: usize) -> usize {
    clamp_payload_size(samples_per_packet.saturating_mul(SAMPLE_BYTES))
}

/// Clip a payload size to the ceiling and to whole samples.
pub fn clamp_payload_size(bytes: usize) -> usize {
    let bytes = bytes.min(MAX_PAYLOAD_SIZE);
    bytes - bytes % SAMPLE_BYTES
}

/// Where the sample stream is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`. A missing port
    /// falls back to `default_port`.
    pub fn parse(input: &str, default_port: u16) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("destination is empty".into());
        }

        if let Some(rest) = input.strip_prefix('[') {
            let closing = rest
                .find(']')
                .ok_or("invalid destination: missing closing ']' for IPv6 host")?;
            let host = &rest[..closing];
            let remainder = &rest[closing + 1..];
            if host.is_empty() {
                return Err("invalid destination: host is empty".into());
            }
            let port = if remainder.is_empty() {
                default_port
            } else if let Some(port_str) = remainder.strip_prefix(':') {
                parse_port(port_str)?
            } else {
                return Err("invalid destination: expected ':<port>' after ']'".into());
            };
            return Ok(Self::new(host, port));
        }

        if input.contains(':') {
            if input.matches(':').count() > 1 {
                return Err("invalid destination: IPv6 host must be bracketed like [::1]:28888".into());
            }
            let (host, port_str) = input
                .rsplit_once(':')
                .ok_or("invalid destination: expected host:port")?;
            if host.is_empty() {
                return Err("invalid destination: host is empty".into());
            }
            return Ok(Self::new(host, parse_port(port_str)?));
        }

        Ok(Self::new(input, default_port))
    }

    /// True when the host is the requester placeholder `-`.
    pub fn is_requester(&self) -> bool {
        self.host == REQUESTER_HOST
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("invalid port: '{port_str}'"))?;
    if port == 0 {
        return Err("invalid port: 0".into());
    }
    Ok(port)
}

/// Configuration surface of the sample-stream sink bound to a device.
pub trait NetworkTransport: Send {
    fn destination(&self) -> Option<Destination>;

    /// Re-point the underlying sink. The host must already be resolved
    /// (no `-` placeholder).
    fn set_destination(&mut self, destination: Destination) -> DynResult<()>;

    fn header(&self) -> bool;

    fn set_header(&mut self, enabled: bool);

    /// Sample payload bytes per datagram, excluding the framing header.
    fn payload_size(&self) -> usize;

    /// Set the payload size; returns the clipped effective size.
    fn set_payload_size(&mut self, bytes: usize) -> DynResult<usize>;
}

pub const HEADER_LEN: usize = 4;
/// Set on the first datagram after a (re)start.
pub const FLAG_STREAM_START: u8 = 0x01;

/// Framing header prepended to each datagram when enabled.
///
/// Layout: flags (u8), notification (u8), sequence (u16 little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub flags: u8,
    pub notification: u8,
    pub sequence: u16,
}

impl PacketHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let seq = self.sequence.to_le_bytes();
        [self.flags, self.notification, seq[0], seq[1]]
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            flags: buf[0],
            notification: buf[1],
            sequence: u16::from_le_bytes([buf[2], buf[3]]),
        })
    }

    pub fn is_stream_start(&self) -> bool {
        self.flags & FLAG_STREAM_START != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_largest_512_multiple_below_udp_limit() {
        assert_eq!(MAX_PAYLOAD_SIZE, 65_024);
        assert_eq!(MAX_PAYLOAD_SIZE % PAYLOAD_ALIGN, 0);
        assert!(MAX_PAYLOAD_SIZE + PAYLOAD_ALIGN > MAX_UDP_PAYLOAD);
    }

    #[test]
    fn payload_size_never_exceeds_ceiling() {
        for samples in [0usize, 1, 512, 4096, 16_256, 16_257, 65_536, usize::MAX] {
            let size = payload_size_for(samples);
            assert!(size <= MAX_PAYLOAD_SIZE, "samples={samples} size={size}");
            assert_eq!(size % SAMPLE_BYTES, 0);
        }
        assert_eq!(payload_size_for(4096), 16_384);
        assert_eq!(payload_size_for(100_000), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn clamp_rounds_down_to_whole_samples() {
        assert_eq!(clamp_payload_size(1_027), 1_024);
        assert_eq!(clamp_payload_size(70_000), 65_024);
    }

    #[test]
    fn parse_destination_forms() {
        assert_eq!(
            Destination::parse("192.168.1.10", 28888).unwrap(),
            Destination::new("192.168.1.10", 28888)
        );
        assert_eq!(
            Destination::parse("host.lan:5000", 28888).unwrap(),
            Destination::new("host.lan", 5000)
        );
        assert_eq!(
            Destination::parse("[::1]:7000", 28888).unwrap(),
            Destination::new("::1", 7000)
        );
        let requester = Destination::parse("-:9000", 28888).unwrap();
        assert!(requester.is_requester());
        assert_eq!(requester.port, 9000);
    }

    #[test]
    fn parse_destination_rejects_bad_input() {
        assert!(Destination::parse("", 1).is_err());
        assert!(Destination::parse("host:0", 1).is_err());
        assert!(Destination::parse("host:abc", 1).is_err());
        assert!(Destination::parse("::1:7000", 1)
            .unwrap_err()
            .contains("must be bracketed"));
    }

    #[test]
    fn destination_display_brackets_ipv6() {
        assert_eq!(Destination::new("::1", 28888).to_string(), "[::1]:28888");
        assert_eq!(Destination::new("10.0.0.1", 1234).to_string(), "10.0.0.1:1234");
    }

    #[test]
    fn header_layout() {
        let header = PacketHeader {
            flags: FLAG_STREAM_START,
            notification: 0,
            sequence: 0x1234,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x01, 0x00, 0x34, 0x12]);
        let decoded = PacketHeader::decode(&bytes).unwrap();
        assert!(decoded.is_stream_start());
        assert_eq!(decoded.sequence, 0x1234);
        assert!(PacketHeader::decode(&bytes[..3]).is_none());
    }
}

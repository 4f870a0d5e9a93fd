// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! UDP receiver for the raw I/Q sample stream.
//!
//! Runs independently of the control session, so samples keep flowing
//! (possibly stale) while the control channel reconnects.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use rxlink_core::transport::{MAX_UDP_PAYLOAD, SAMPLE_BYTES};
use rxlink_core::PacketHeader;

/// Running counters for the received stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub packets: u64,
    pub bytes: u64,
    /// Datagrams missing according to the header sequence.
    pub lost: u64,
    /// Stream-start markers seen.
    pub restarts: u64,
}

/// Tracks header sequence numbers and counts gaps.
#[derive(Debug, Default)]
struct SequenceTracker {
    expected: Option<u16>,
}

impl SequenceTracker {
    /// Returns the number of datagrams skipped before `header`.
    fn observe(&mut self, header: &PacketHeader) -> u64 {
        let lost = match self.expected {
            Some(expected) if !header.is_stream_start() => {
                u64::from(header.sequence.wrapping_sub(expected))
            }
            _ => 0,
        };
        self.expected = Some(header.sequence.wrapping_add(1));
        lost
    }
}

pub struct SampleReceiver {
    socket: UdpSocket,
}

impl SampleReceiver {
    /// Bind the receiving socket. Datagrams queue in the socket until
    /// [`SampleReceiver::run`] starts.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Sample receiver on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until shutdown, publishing sample payloads. `header` is the
    /// framing the server agreed to; when set, the header is stripped.
    pub async fn run(
        self,
        header: bool,
        samples_tx: broadcast::Sender<Bytes>,
        stats_tx: watch::Sender<StreamStats>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let mut tracker = SequenceTracker::default();
        let mut stats = StreamStats::default();

        loop {
            let (len, from) = tokio::select! {
                received = self.socket.recv_from(&mut buf) => received?,
                changed = shutdown_rx.changed() => {
                    match changed {
                        Ok(()) if *shutdown_rx.borrow() => break,
                        Ok(()) => continue,
                        Err(_) => break,
                    }
                }
            };

            let datagram = &buf[..len];
            let payload = if header {
                let Some(header) = PacketHeader::decode(datagram) else {
                    debug!("Short datagram ({} bytes) from {}", len, from);
                    continue;
                };
                if header.is_stream_start() {
                    stats.restarts += 1;
                    info!("Stream (re)started by {} at sequence {}", from, header.sequence);
                }
                let lost = tracker.observe(&header);
                if lost > 0 {
                    warn!("Lost {} datagram(s) before sequence {}", lost, header.sequence);
                    stats.lost += lost;
                }
                &datagram[rxlink_core::transport::HEADER_LEN..]
            } else {
                datagram
            };

            if payload.len() % SAMPLE_BYTES != 0 {
                debug!("Datagram of {} bytes is not whole samples", payload.len());
            }
            stats.packets += 1;
            stats.bytes += payload.len() as u64;
            stats_tx.send_replace(stats);
            let _ = samples_tx.send(Bytes::copy_from_slice(payload));
        }
        info!(
            "Sample receiver stopped ({} packets, {} bytes, {} lost)",
            stats.packets, stats.bytes, stats.lost
        );
        Ok(())
    }
}

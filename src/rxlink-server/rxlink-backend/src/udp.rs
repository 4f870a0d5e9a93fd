// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! UDP sample sink and the per-device streaming thread.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use num_complex::Complex;
use tracing::{debug, info, warn};

use rxlink_core::transport::{clamp_payload_size, payload_size_for, FLAG_STREAM_START, SAMPLE_BYTES};
use rxlink_core::{Destination, DynResult, NetworkTransport, PacketHeader};

use crate::signal::IqSource;

/// Longest single sleep of the pump, so `stop` is observed promptly.
const PUMP_SLEEP_SLICE: Duration = Duration::from_millis(20);
/// Pacing debt beyond this is dropped instead of bursting to catch up.
const PUMP_MAX_LAG: Duration = Duration::from_millis(500);

struct SinkState {
    destination: Option<Destination>,
    target: Option<SocketAddr>,
    socket: Option<UdpSocket>,
    header: bool,
    payload_size: usize,
    sequence: u16,
    start_pending: bool,
}

/// Fire-and-forget UDP sink for interleaved 16-bit I/Q.
///
/// Clones share state: the session configures the sink through
/// [`NetworkTransport`] while the backend's pump thread sends through it.
#[derive(Clone)]
pub struct UdpTransport {
    state: Arc<Mutex<SinkState>>,
}

impl UdpTransport {
    pub fn new(samples_per_packet: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                destination: None,
                target: None,
                socket: None,
                header: false,
                payload_size: payload_size_for(samples_per_packet),
                sequence: 0,
                start_pending: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whole samples carried by one datagram.
    pub fn samples_per_packet(&self) -> usize {
        self.lock().payload_size / SAMPLE_BYTES
    }

    /// Flag the next datagram as the first of a new stream.
    pub fn mark_stream_start(&self) {
        self.lock().start_pending = true;
    }

    /// Send one block as a single datagram.
    ///
    /// Returns `Ok(false)` when no destination is set and the block was
    /// dropped.
    pub fn send_block(&self, block: &[Complex<f32>]) -> io::Result<bool> {
        let mut state = self.lock();
        let Some(target) = state.target else {
            return Ok(false);
        };

        let mut datagram = Vec::with_capacity(block.len() * SAMPLE_BYTES + 4);
        if state.header {
            let header = PacketHeader {
                flags: if state.start_pending { FLAG_STREAM_START } else { 0 },
                notification: 0,
                sequence: state.sequence,
            };
            datagram.extend_from_slice(&header.to_bytes());
        }
        for sample in block {
            datagram.extend_from_slice(&to_i16(sample.re).to_le_bytes());
            datagram.extend_from_slice(&to_i16(sample.im).to_le_bytes());
        }

        state.sequence = state.sequence.wrapping_add(1);
        state.start_pending = false;
        match &state.socket {
            Some(socket) => socket.send_to(&datagram, target).map(|_| true),
            None => Ok(false),
        }
    }
}

impl NetworkTransport for UdpTransport {
    fn destination(&self) -> Option<Destination> {
        self.lock().destination.clone()
    }

    fn set_destination(&mut self, destination: Destination) -> DynResult<()> {
        if destination.is_requester() {
            return Err("requester placeholder must be resolved before use".into());
        }
        let target = (destination.host.as_str(), destination.port)
            .to_socket_addrs()
            .map_err(|e| format!("cannot resolve {}: {}", destination, e))?
            .next()
            .ok_or_else(|| format!("no address for {}", destination))?;

        let mut state = self.lock();
        let rebind = match &state.socket {
            Some(socket) => socket
                .local_addr()
                .map(|local| local.is_ipv4() != target.is_ipv4())
                .unwrap_or(true),
            None => true,
        };
        if rebind {
            let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            state.socket = Some(UdpSocket::bind(bind_addr)?);
        }
        info!("Sample stream destination set to {} ({})", destination, target);
        state.target = Some(target);
        state.destination = Some(destination);
        Ok(())
    }

    fn header(&self) -> bool {
        self.lock().header
    }

    fn set_header(&mut self, enabled: bool) {
        let mut state = self.lock();
        if enabled && !state.header {
            state.start_pending = true;
        }
        state.header = enabled;
    }

    fn payload_size(&self) -> usize {
        self.lock().payload_size
    }

    fn set_payload_size(&mut self, bytes: usize) -> DynResult<usize> {
        let size = clamp_payload_size(bytes);
        if size == 0 {
            return Err(format!("payload size {} holds no whole sample", bytes).into());
        }
        self.lock().payload_size = size;
        Ok(size)
    }
}

fn to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Streams blocks from an [`IqSource`] into a [`UdpTransport`] on a
/// dedicated OS thread until stopped.
pub struct SamplePump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SamplePump {
    pub fn spawn(source: Box<dyn IqSource>, transport: UdpTransport) -> DynResult<Self> {
        transport.mark_stream_start();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::Builder::new()
            .name("rxlink-pump".to_string())
            .spawn(move || pump_loop(source, transport, flag))
            .map_err(|e| format!("failed to spawn sample pump: {}", e))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Sample pump thread panicked");
            }
        }
    }
}

impl Drop for SamplePump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_loop(mut source: Box<dyn IqSource>, transport: UdpTransport, running: Arc<AtomicBool>) {
    let mut block = Vec::new();
    let mut deadline = Instant::now();
    let mut send_errors: u64 = 0;
    debug!("Sample pump started");

    while running.load(Ordering::Acquire) {
        let samples = transport.samples_per_packet().max(1);
        block.resize(samples, Complex::new(0.0_f32, 0.0_f32));

        let n = match source.read_into(&mut block) {
            Ok(n) => n,
            Err(e) => {
                warn!("I/Q source read error: {}; retrying", e);
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        if n == 0 {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }

        if let Err(e) = transport.send_block(&block[..n]) {
            send_errors += 1;
            // Log the first failure and then every thousandth.
            if send_errors % 1000 == 1 {
                warn!("Sample datagram send failed ({} so far): {}", send_errors, e);
            }
        }

        let rate = source.sample_rate();
        let rate = if rate > 0.0 { rate } else { 1.0 };
        deadline += Duration::from_secs_f64(n as f64 / rate);
        let now = Instant::now();
        if now > deadline + PUMP_MAX_LAG {
            deadline = now;
        }
        sleep_until(deadline, &running);
    }

    debug!("Sample pump stopped");
}

fn sleep_until(deadline: Instant, running: &AtomicBool) {
    loop {
        let now = Instant::now();
        if now >= deadline || !running.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep((deadline - now).min(PUMP_SLEEP_SLICE));
    }
}

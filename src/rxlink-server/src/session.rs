// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-connection control session.
//!
//! A session greets the client with `DEVICE <summary>` (or `DEVICE -`), then
//! answers one response line per request line until the client disconnects.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rxlink_backend::{DeviceFactory, RadioHandle};
use rxlink_core::{AntennaSelector, Destination, NetworkTransport};
use rxlink_protocol::{
    format_hz, format_tune_reply, parse_on_off, parse_request, read_limited_line, DeviceReply,
    DeviceSummary, RejectedLine, Request, Response, Verb, MAX_LINE_BYTES,
};

/// Unbind request for `DEVICE`.
const UNBIND_HINT: &str = "!";
/// Reply verb for a rejected line without a readable leading token.
const REJECTED_VERB: &str = "ERROR";

/// Device shared by every session when the server runs locked.
pub type SharedRadio = Arc<Mutex<RadioHandle>>;

/// Server-wide state every session sees.
pub struct SessionContext {
    pub factory: DeviceFactory,
    pub locked: Option<SharedRadio>,
    /// Port used when `DEST` omits one and nothing was set before.
    pub default_port: u16,
    pub idle_timeout: Option<Duration>,
}

enum Binding {
    None,
    Owned(RadioHandle),
    Shared(SharedRadio),
}

pub struct ControlSession {
    id: Uuid,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    binding: Binding,
}

impl ControlSession {
    pub fn new(ctx: Arc<SessionContext>, peer: SocketAddr) -> Self {
        let binding = match &ctx.locked {
            Some(shared) => Binding::Shared(Arc::clone(shared)),
            None => Binding::None,
        };
        Self {
            id: Uuid::new_v4(),
            peer,
            ctx,
            binding,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.binding, Binding::Shared(_))
    }

    pub fn has_device(&self) -> bool {
        !matches!(self.binding, Binding::None)
    }

    /// Run `f` against the bound radio; the shared mutex is held for the
    /// duration of the call only.
    fn with_radio<R>(&mut self, f: impl FnOnce(&mut RadioHandle) -> R) -> Option<R> {
        match &mut self.binding {
            Binding::None => None,
            Binding::Owned(radio) => Some(f(radio)),
            Binding::Shared(shared) => {
                let mut radio = shared.lock().unwrap_or_else(PoisonError::into_inner);
                Some(f(&mut radio))
            }
        }
    }

    fn device_reply(&mut self) -> DeviceReply {
        self.with_radio(|radio| DeviceReply::Bound(summarize(radio)))
            .unwrap_or_else(DeviceReply::unbound)
    }

    /// First line sent after accept.
    pub fn greeting(&mut self) -> Response {
        Response::device(&self.device_reply())
    }

    /// Answer a single request.
    pub fn handle_request(&mut self, request: &Request) -> Response {
        let verb = request.verb.clone();
        match verb {
            Verb::Ping => return Response::ok(verb),
            Verb::Other(_) => return Response::unknown(verb),
            Verb::Device => return self.handle_device(request.data.as_deref()),
            _ => {}
        }

        let peer = self.peer;
        let default_port = self.ctx.default_port;
        let data = request.data.as_deref();
        let outcome = self.with_radio(|radio| apply(radio, &verb, data, peer, default_port));
        match outcome {
            Some(Ok(response)) => response,
            Some(Err(message)) => {
                debug!("[{}] {} failed: {}", self.id, verb, message);
                Response::fail(verb, Some(message.as_str()))
            }
            None => Response::no_device(verb),
        }
    }

    fn handle_device(&mut self, hint: Option<&str>) -> Response {
        if self.is_locked() {
            // Locked: the hint is ignored, the shared device is reported.
            return Response::device(&self.device_reply());
        }
        let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) else {
            return Response::device(&self.device_reply());
        };

        // The previous device is destroyed before the new one is built.
        self.release();
        if hint == UNBIND_HINT {
            return Response::device(&DeviceReply::unbound());
        }

        match self.ctx.factory.create_device(hint) {
            Ok(radio) => {
                info!("[{}] Bound device {}", self.id, radio.hint);
                self.binding = Binding::Owned(radio);
                Response::device(&self.device_reply())
            }
            Err(e) => {
                warn!("[{}] Device creation failed for '{}': {}", self.id, hint, e);
                Response::device(&DeviceReply::failed(e.to_string()))
            }
        }
    }

    /// Drop the bound device. An owned device is stopped and closed; a
    /// shared one is left untouched.
    fn release(&mut self) {
        if let Binding::Owned(radio) = std::mem::replace(&mut self.binding, Binding::None) {
            info!("[{}] Closing device {}", self.id, radio.hint);
            drop(radio);
        }
    }

    /// Serve the connection until EOF, idle timeout, error or shutdown.
    pub async fn run(
        self,
        socket: TcpStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let id = self.id;
        let peer = self.peer;
        let idle_timeout = self.ctx.idle_timeout;
        let (reader, mut writer) = socket.into_split();
        let mut reader = BufReader::new(reader);
        let mut slot = Some(self);

        let result = async {
            let greeting = off_worker(&mut slot, |session| session.greeting()).await?;
            write_response(&mut writer, &greeting).await?;
            loop {
                let read = read_limited_line(&mut reader, MAX_LINE_BYTES);
                let read = tokio::select! {
                    read = read_with_timeout(read, idle_timeout) => read,
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("[{}] Closing session on shutdown", id);
                            break;
                        }
                        continue;
                    }
                };
                let line = match read {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        let Some(rejected) = RejectedLine::from_io(&e) else {
                            return Err(e);
                        };
                        warn!("[{}] Rejected line: {}", id, rejected);
                        write_response(&mut writer, &rejected_response(rejected)).await?;
                        continue;
                    }
                };

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Ok(request) = parse_request(trimmed) else {
                    continue;
                };
                debug!("[{}] <- {}", id, trimmed);
                let response =
                    off_worker(&mut slot, move |session| session.handle_request(&request)).await?;
                debug!("[{}] -> {}", id, response.to_line());
                write_response(&mut writer, &response).await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        info!("[{}] Client {} disconnected", id, peer);
        if slot.is_some() {
            off_worker(&mut slot, |session| session.release()).await?;
        }
        result
    }
}

/// Run a session step on the blocking pool. Device opens, `DEST` name
/// lookups, the shared-device lock and stopping the sample thread all block.
async fn off_worker<R, F>(slot: &mut Option<ControlSession>, f: F) -> std::io::Result<R>
where
    F: FnOnce(&mut ControlSession) -> R + Send + 'static,
    R: Send + 'static,
{
    let mut session = slot
        .take()
        .ok_or_else(|| std::io::Error::other("session state lost"))?;
    let (session, out) = tokio::task::spawn_blocking(move || {
        let out = f(&mut session);
        (session, out)
    })
    .await
    .map_err(std::io::Error::other)?;
    *slot = Some(session);
    Ok(out)
}

/// `FAIL` reply for a line the reader could not accept.
fn rejected_response(rejected: &RejectedLine) -> Response {
    let verb = Verb::parse(rejected.verb.as_deref().unwrap_or(REJECTED_VERB));
    Response::fail(verb, Some(rejected.reason.as_str()))
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// `Ok(None)` on EOF or idle timeout.
async fn read_with_timeout<F>(read: F, timeout: Option<Duration>) -> std::io::Result<Option<String>>
where
    F: std::future::Future<Output = std::io::Result<Option<String>>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(line) => line,
            Err(_) => {
                info!("Session idle for {:?}, closing", limit);
                Ok(None)
            }
        },
        None => read.await,
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> std::io::Result<()> {
    let line = response.to_line() + "\n";
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn summarize(radio: &RadioHandle) -> DeviceSummary {
    let device = &radio.device;
    DeviceSummary {
        name: device.name().unwrap_or_else(|_| "unknown".to_string()),
        gain: device.gain_range(),
        master_clock_hz: device.master_clock(),
        samples_per_packet: radio.transport.samples_per_packet(),
        antennas: device.antennas(),
        serial: device.serial().ok().flatten(),
    }
}

fn parse_number(verb: &Verb, data: &str) -> Result<f64, String> {
    data.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid {} value '{}'", verb.as_str().to_ascii_lowercase(), data))
}

/// Map a device-bound request onto the radio.
fn apply(
    radio: &mut RadioHandle,
    verb: &Verb,
    data: Option<&str>,
    peer: SocketAddr,
    default_port: u16,
) -> Result<Response, String> {
    let verb = verb.clone();
    let device = &mut radio.device;
    match (&verb, data) {
        (Verb::Go, _) => {
            if device.is_running() {
                return Ok(Response::ok_with(verb, "RUNNING"));
            }
            device.start().map_err(|e| e.to_string())?;
            Ok(Response::ok(verb))
        }
        (Verb::Stop, _) => {
            device.stop().map_err(|e| e.to_string())?;
            Ok(Response::ok(verb))
        }
        (Verb::Freq, None) => Ok(Response::ok_with(verb, format_hz(device.freq()))),
        (Verb::Freq, Some(data)) => {
            let hz = parse_number(&verb, data)?;
            let result = device.set_freq(hz).map_err(|e| e.to_string())?;
            let verdict = device.was_tune_successful();
            Ok(Response::ok_with(verb, format_tune_reply(verdict, &result)))
        }
        (Verb::Gain, None) => Ok(Response::ok_with(verb, format_hz(device.gain()))),
        (Verb::Gain, Some(data)) => {
            let gain = parse_number(&verb, data)?;
            device.set_gain(gain).map_err(|e| e.to_string())?;
            Ok(Response::ok(verb))
        }
        (Verb::Rate, None) => Ok(Response::ok_with(verb, format_hz(device.sample_rate()))),
        (Verb::Rate, Some(data)) => {
            let rate = parse_number(&verb, data)?;
            device.set_sample_rate(rate).map_err(|e| e.to_string())?;
            Ok(Response::ok(verb))
        }
        (Verb::Antenna, None) => match device.antenna() {
            Some(antenna) => Ok(Response::ok_with(verb, antenna)),
            None => Err("no antenna selected".to_string()),
        },
        (Verb::Antenna, Some(data)) => {
            device
                .set_antenna(&AntennaSelector::parse(data))
                .map_err(|e| e.to_string())?;
            Ok(Response::ok(verb))
        }
        (Verb::Dest, None) => match radio.transport.destination() {
            Some(dest) => Ok(Response::ok_with(verb, dest)),
            None => Err("destination not set".to_string()),
        },
        (Verb::Dest, Some(data)) => {
            let port = radio
                .transport
                .destination()
                .map(|d| d.port)
                .unwrap_or(default_port);
            let mut dest = Destination::parse(data, port)?;
            if dest.is_requester() {
                dest.host = peer.ip().to_string();
            }
            radio
                .transport
                .set_destination(dest.clone())
                .map_err(|e| e.to_string())?;
            Ok(Response::ok_with(verb, dest))
        }
        (Verb::Header, None) => Ok(Response::ok_with(
            verb,
            if radio.transport.header() { "ON" } else { "OFF" },
        )),
        (Verb::Header, Some(data)) => {
            let enabled =
                parse_on_off(data).ok_or_else(|| format!("expected ON or OFF, got '{}'", data))?;
            radio.transport.set_header(enabled);
            Ok(Response::ok(verb))
        }
        _ => Ok(Response::unknown(verb)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxlink_backend::{register_builtin_backends_on, RegistrationContext};
    use rxlink_protocol::{parse_tune_reply, Status};
    use rxlink_core::TuneVerdict;

    fn factory() -> DeviceFactory {
        let mut registry = RegistrationContext::new();
        register_builtin_backends_on(&mut registry);
        DeviceFactory::new(Arc::new(registry))
            .with_default_hint(Some("sim serial=DEFAULT".to_string()))
    }

    fn context(locked: Option<SharedRadio>) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            factory: factory(),
            locked,
            default_port: 28888,
            idle_timeout: None,
        })
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn send(session: &mut ControlSession, line: &str) -> String {
        session
            .handle_request(&parse_request(line).unwrap())
            .to_line()
    }

    #[test]
    fn device_less_session_answers_device_status() {
        let mut session = ControlSession::new(context(None), peer());
        assert_eq!(session.greeting().to_line(), "DEVICE -");
        for verb in ["GO", "STOP", "FREQ 1", "GAIN", "RATE 1e6", "ANTENNA", "DEST -", "HEADER ON"] {
            let reply = send(&mut session, verb);
            let expected = format!("{} DEVICE", verb.split_whitespace().next().unwrap());
            assert_eq!(reply, expected);
        }
        assert_eq!(send(&mut session, "PING"), "PING OK");
        assert_eq!(send(&mut session, "bogus 1"), "BOGUS UNKNOWN");
    }

    #[test]
    fn bind_and_unbind() {
        let mut session = ControlSession::new(context(None), peer());
        let reply = send(&mut session, "DEVICE sim name=bench,antennas=\"A|B\"");
        assert_eq!(reply, "DEVICE bench|0|49.6|0.5|32000000|4096|A,B|");
        assert!(session.has_device());
        assert_eq!(send(&mut session, "device"), reply);
        assert_eq!(send(&mut session, "DEVICE !"), "DEVICE -");
        assert!(!session.has_device());
        assert_eq!(send(&mut session, "GAIN"), "GAIN DEVICE");
    }

    #[test]
    fn default_hint_substitution() {
        let mut session = ControlSession::new(context(None), peer());
        let reply = send(&mut session, "DEVICE -");
        assert!(reply.ends_with("|DEFAULT"), "{}", reply);
    }

    #[test]
    fn creation_failure_reports_reason() {
        let mut session = ControlSession::new(context(None), peer());
        let reply = send(&mut session, "DEVICE nosuch");
        assert!(reply.starts_with("DEVICE - unknown backend: NOSUCH"), "{}", reply);
        assert!(!session.has_device());
    }

    #[test]
    fn freq_set_reports_residual_and_verdict() {
        let mut session = ControlSession::new(context(None), peer());
        send(&mut session, "DEVICE sim lo_error=100,tolerance=100");
        let response = session.handle_request(&parse_request("FREQ 100000000").unwrap());
        assert_eq!(response.status(), Some(Status::Ok));
        let (verdict, result) = parse_tune_reply(response.data().unwrap()).unwrap();
        assert_eq!(verdict, TuneVerdict::OnTarget);
        assert_eq!(result.actual_baseband_hz, 100.0);
        assert_eq!(send(&mut session, "FREQ"), "FREQ OK 100000100");

        send(&mut session, "DEVICE sim lo_error=100,tolerance=50");
        assert_eq!(
            send(&mut session, "FREQ 100000000"),
            "FREQ OK HIGH 100000000 100000100 100 100"
        );
    }

    #[test]
    fn gain_rate_antenna_round_trip() {
        let mut session = ControlSession::new(context(None), peer());
        send(&mut session, "DEVICE sim gain_max=30");
        assert_eq!(send(&mut session, "GAIN 45"), "GAIN OK");
        assert_eq!(send(&mut session, "GAIN"), "GAIN OK 30");
        assert_eq!(send(&mut session, "RATE 1000000"), "RATE OK");
        assert_eq!(send(&mut session, "RATE"), "RATE OK 1000000");
        assert_eq!(send(&mut session, "RATE 0"), "RATE FAIL invalid sample rate: 0");
        assert!(send(&mut session, "RATE fast").starts_with("RATE FAIL invalid rate value"));
        assert_eq!(send(&mut session, "ANTENNA"), "ANTENNA OK RX1");
        assert_eq!(send(&mut session, "ANTENNA 1"), "ANTENNA OK");
        assert_eq!(send(&mut session, "ANTENNA"), "ANTENNA OK RX2");
        assert!(send(&mut session, "ANTENNA XYZ").starts_with("ANTENNA FAIL"));
    }

    #[test]
    fn dest_and_header() {
        let mut session = ControlSession::new(context(None), peer());
        send(&mut session, "DEVICE sim");
        assert_eq!(send(&mut session, "DEST"), "DEST FAIL destination not set");
        assert_eq!(send(&mut session, "DEST -"), "DEST OK 127.0.0.1:28888");
        assert_eq!(send(&mut session, "DEST -:30000"), "DEST OK 127.0.0.1:30000");
        assert_eq!(send(&mut session, "DEST 127.0.0.1"), "DEST OK 127.0.0.1:30000");
        assert_eq!(send(&mut session, "DEST"), "DEST OK 127.0.0.1:30000");
        assert_eq!(send(&mut session, "HEADER"), "HEADER OK OFF");
        assert_eq!(send(&mut session, "HEADER on"), "HEADER OK");
        assert_eq!(send(&mut session, "HEADER"), "HEADER OK ON");
        assert!(send(&mut session, "HEADER maybe").starts_with("HEADER FAIL"));
    }

    #[test]
    fn go_stop_cycle() {
        let mut session = ControlSession::new(context(None), peer());
        send(&mut session, "DEVICE sim");
        assert_eq!(send(&mut session, "GO"), "GO OK");
        assert_eq!(send(&mut session, "GO"), "GO OK RUNNING");
        assert_eq!(send(&mut session, "STOP"), "STOP OK");
        assert_eq!(send(&mut session, "STOP"), "STOP OK");
    }

    #[test]
    fn locked_mode_ignores_hints_and_keeps_device() {
        let shared: SharedRadio =
            Arc::new(Mutex::new(factory().create_device("sim name=shared").unwrap()));
        let ctx = context(Some(Arc::clone(&shared)));

        let mut first = ControlSession::new(Arc::clone(&ctx), peer());
        let greeting = first.greeting().to_line();
        assert!(greeting.starts_with("DEVICE shared|"));
        assert_eq!(send(&mut first, "DEVICE sim name=other"), greeting);
        assert_eq!(send(&mut first, "DEVICE !"), greeting);
        assert_eq!(send(&mut first, "GO"), "GO OK");
        drop(first);

        assert!(shared.lock().unwrap().device.is_running());
        let mut second = ControlSession::new(ctx, peer());
        assert_eq!(send(&mut second, "GO"), "GO OK RUNNING");
        assert_eq!(send(&mut second, "STOP"), "STOP OK");
    }
}

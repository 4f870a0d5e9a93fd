// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Control-plane client for rxlink-server.
//!
//! Every call sends one request line and waits for the matching reply while
//! holding the session lock, so keepalive pings and explicit calls never
//! interleave. A transport fault tears the connection down; while the
//! reconnect budget allows, the client reconnects, replays the last
//! successful settings and retries the interrupted call once. Once the
//! budget is spent the session enters [`SessionState::Closed`] and signals
//! end-of-stream.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use rxlink_core::{
    LinkError, LinkResult, ReconnectBudget, ReconnectPolicy, TuneResult, TuneVerdict,
};
use rxlink_protocol::{
    format_hz, parse_on_off, parse_response, parse_tune_reply, read_limited_line, DeviceReply,
    DeviceSummary, Request, Response, Status, Verb, MAX_LINE_BYTES,
};

use crate::endpoint::RemoteEndpoint;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingGreeting,
    Ready,
    Faulted,
    Reconnecting,
    /// Terminal: no further calls succeed.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingGreeting => "awaiting greeting",
            SessionState::Ready => "ready",
            SessionState::Faulted => "faulted",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: RemoteEndpoint,
    /// Sent as `DEVICE <hint>` after every connect.
    pub hint: Option<String>,
    /// Send `GO` at the end of every connect sequence.
    pub auto_start: bool,
    pub reconnect: ReconnectPolicy,
    /// `PING` interval while ready; `None` disables keepalive.
    pub keepalive: Option<Duration>,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl ClientOptions {
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self {
            endpoint,
            hint: None,
            auto_start: true,
            reconnect: ReconnectPolicy::default(),
            keepalive: None,
            connect_timeout: CONNECT_TIMEOUT,
            io_timeout: IO_TIMEOUT,
        }
    }
}

/// Settings the server accepted; replayed after a reconnect.
#[derive(Debug, Clone, Default, PartialEq)]
struct Applied {
    destination: Option<String>,
    header: Option<bool>,
    sample_rate: Option<f64>,
    antenna: Option<String>,
    freq_hz: Option<f64>,
    gain: Option<f64>,
}

impl Applied {
    fn requests(&self) -> Vec<Request> {
        let mut requests = Vec::new();
        if let Some(dest) = &self.destination {
            requests.push(Request::with_data(Verb::Dest, dest.clone()));
        }
        if let Some(header) = self.header {
            requests.push(Request::with_data(Verb::Header, on_off(header)));
        }
        if let Some(rate) = self.sample_rate {
            requests.push(Request::with_data(Verb::Rate, format_hz(rate)));
        }
        if let Some(antenna) = &self.antenna {
            requests.push(Request::with_data(Verb::Antenna, antenna.clone()));
        }
        if let Some(freq) = self.freq_hz {
            requests.push(Request::with_data(Verb::Freq, format_hz(freq)));
        }
        if let Some(gain) = self.gain {
            requests.push(Request::with_data(Verb::Gain, format_hz(gain)));
        }
        requests
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

struct Inner {
    conn: Option<Connection>,
    budget: ReconnectBudget,
    applied: Applied,
    summary: Option<DeviceSummary>,
}

pub struct ClientSession {
    options: ClientOptions,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    eos_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
}

impl ClientSession {
    pub fn new(options: ClientOptions) -> Self {
        let budget = options.reconnect.budget();
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (eos_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            options,
            inner: Mutex::new(Inner {
                conn: None,
                budget,
                applied: Applied::default(),
                summary: None,
            }),
            state_tx,
            eos_tx,
            shutdown_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Flips to `true` once the session is closed for good.
    pub fn end_of_stream(&self) -> watch::Receiver<bool> {
        self.eos_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Run the connect sequence if not connected yet.
    pub async fn connect(&self) -> LinkResult<Option<DeviceSummary>> {
        let mut inner = self.inner.lock().await;
        if self.is_closed() {
            return Err(LinkError::Shutdown);
        }
        if inner.conn.is_none() {
            self.establish(&mut inner).await?;
        }
        Ok(inner.summary.clone())
    }

    /// Query the bound device; `None` when the server has none.
    pub async fn device_summary(&self) -> LinkResult<Option<DeviceSummary>> {
        self.transact(Request::new(Verb::Device), |inner, response| {
            let reply = DeviceReply::parse(&response.body).map_err(LinkError::protocol)?;
            inner.summary = reply.summary().cloned();
            Ok(inner.summary.clone())
        })
        .await
    }

    /// Start streaming. Returns `true` if the device was already running.
    pub async fn start(&self) -> LinkResult<bool> {
        self.transact(Request::new(Verb::Go), |_, response| {
            Ok(check_status(response)? == Some("RUNNING"))
        })
        .await
    }

    pub async fn stop(&self) -> LinkResult<()> {
        self.transact(Request::new(Verb::Stop), |_, response| {
            check_status(response).map(|_| ())
        })
        .await
    }

    pub async fn set_freq(&self, hz: f64) -> LinkResult<(TuneVerdict, TuneResult)> {
        let request = Request::with_data(Verb::Freq, format_hz(hz));
        self.transact(request, |inner, response| {
            let data = check_status(response)?
                .ok_or_else(|| LinkError::protocol("FREQ reply carries no tune result"))?;
            let tuned = parse_tune_reply(data)?;
            inner.applied.freq_hz = Some(hz);
            Ok(tuned)
        })
        .await
    }

    pub async fn freq(&self) -> LinkResult<f64> {
        self.transact(Request::new(Verb::Freq), |_, response| number(response))
            .await
    }

    pub async fn set_gain(&self, gain: f64) -> LinkResult<()> {
        let request = Request::with_data(Verb::Gain, format_hz(gain));
        self.transact(request, |inner, response| {
            check_status(response)?;
            inner.applied.gain = Some(gain);
            Ok(())
        })
        .await
    }

    pub async fn gain(&self) -> LinkResult<f64> {
        self.transact(Request::new(Verb::Gain), |_, response| number(response))
            .await
    }

    pub async fn set_sample_rate(&self, rate: f64) -> LinkResult<()> {
        let request = Request::with_data(Verb::Rate, format_hz(rate));
        self.transact(request, |inner, response| {
            check_status(response)?;
            inner.applied.sample_rate = Some(rate);
            Ok(())
        })
        .await
    }

    pub async fn sample_rate(&self) -> LinkResult<f64> {
        self.transact(Request::new(Verb::Rate), |_, response| number(response))
            .await
    }

    pub async fn set_antenna(&self, antenna: &str) -> LinkResult<()> {
        let request = Request::with_data(Verb::Antenna, antenna.trim());
        self.transact(request, |inner, response| {
            check_status(response)?;
            inner.applied.antenna = Some(antenna.trim().to_string());
            Ok(())
        })
        .await
    }

    pub async fn antenna(&self) -> LinkResult<String> {
        self.transact(Request::new(Verb::Antenna), |_, response| text(response))
            .await
    }

    /// Point the sample stream at `host[:port]`; `-` means this client.
    pub async fn set_destination(&self, destination: &str) -> LinkResult<()> {
        let request = Request::with_data(Verb::Dest, destination.trim());
        self.transact(request, |inner, response| {
            check_status(response)?;
            inner.applied.destination = Some(destination.trim().to_string());
            Ok(())
        })
        .await
    }

    pub async fn destination(&self) -> LinkResult<String> {
        self.transact(Request::new(Verb::Dest), |_, response| text(response))
            .await
    }

    pub async fn set_header(&self, enabled: bool) -> LinkResult<()> {
        let request = Request::with_data(Verb::Header, on_off(enabled));
        self.transact(request, |inner, response| {
            check_status(response)?;
            inner.applied.header = Some(enabled);
            Ok(())
        })
        .await
    }

    pub async fn header(&self) -> LinkResult<bool> {
        self.transact(Request::new(Verb::Header), |_, response| {
            let value = text(response)?;
            parse_on_off(&value).ok_or_else(|| {
                LinkError::protocol(format!("invalid HEADER value '{}'", value))
            })
        })
        .await
    }

    pub async fn ping(&self) -> LinkResult<()> {
        self.transact(Request::new(Verb::Ping), |_, response| {
            check_status(response).map(|_| ())
        })
        .await
    }

    /// Close the session for good. A pending call is interrupted and
    /// returns [`LinkError::Shutdown`].
    pub async fn close(&self) {
        self.shutdown_tx.send_replace(true);
        let mut inner = self.inner.lock().await;
        if let Some(mut conn) = inner.conn.take() {
            let _ = conn.writer.shutdown().await;
        }
        self.finish(&mut inner);
    }

    /// Spawn the keepalive task, if an interval is configured.
    pub fn spawn_keepalive(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval = self.options.keepalive?;
        let session = Arc::clone(self);
        Some(tokio::spawn(async move {
            session.keepalive_loop(interval).await;
        }))
    }

    async fn keepalive_loop(&self, interval: Duration) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(shutdown_rx.clone()) => break,
            }
            match self.state() {
                SessionState::Closed => break,
                SessionState::Ready => {}
                _ => continue,
            }
            if let Err(e) = self.ping().await {
                if self.is_closed() {
                    break;
                }
                debug!("Keepalive ping failed: {}", e);
            }
        }
        debug!("Keepalive stopped");
    }

    async fn transact<T, F>(&self, request: Request, handle: F) -> LinkResult<T>
    where
        F: FnOnce(&mut Inner, &Response) -> LinkResult<T>,
    {
        let mut inner = self.inner.lock().await;
        let response = self.call_locked(&mut inner, &request).await?;
        handle(&mut inner, &response)
    }

    async fn call_locked(&self, inner: &mut Inner, request: &Request) -> LinkResult<Response> {
        if self.is_closed() {
            return Err(LinkError::Shutdown);
        }
        if inner.conn.is_none() {
            self.establish(inner).await?;
        }

        let mut retried = false;
        loop {
            let result = match inner.conn.as_mut() {
                Some(conn) => self.exchange(conn, request).await,
                None => Err(LinkError::transport("not connected")),
            };
            match result {
                Ok(response) => return Ok(response),
                Err(LinkError::Shutdown) => {
                    self.finish(inner);
                    return Err(LinkError::Shutdown);
                }
                Err(err) => {
                    warn!("{} to {} failed: {}", request.verb, self.options.endpoint, err);
                    self.recover(inner, err.clone()).await?;
                    if retried {
                        return Err(err);
                    }
                    retried = true;
                }
            }
        }
    }

    async fn establish(&self, inner: &mut Inner) -> LinkResult<()> {
        match self.connect_sequence(inner).await {
            Ok(()) => Ok(()),
            Err(e) => self.recover(inner, e).await,
        }
    }

    /// Tear down and reconnect while the budget allows.
    async fn recover(&self, inner: &mut Inner, mut cause: LinkError) -> LinkResult<()> {
        inner.conn = None;
        loop {
            if cause == LinkError::Shutdown || self.shutdown_requested() {
                self.finish(inner);
                return Err(LinkError::Shutdown);
            }
            self.set_state(SessionState::Faulted);
            if !inner.budget.try_consume() {
                error!(
                    "Giving up on {} after fault: {}",
                    self.options.endpoint, cause
                );
                self.finish(inner);
                return Err(cause);
            }

            let interval = self.options.reconnect.interval();
            if inner.budget.is_unbounded() {
                warn!("{}; reconnecting in {:?}", cause, interval);
            } else {
                warn!(
                    "{}; reconnecting in {:?} ({} attempts left)",
                    cause,
                    interval,
                    inner.budget.remaining()
                );
            }
            self.set_state(SessionState::Reconnecting);
            if !self.sleep_unless_shutdown(interval).await {
                self.finish(inner);
                return Err(LinkError::Shutdown);
            }

            match self.connect_sequence(inner).await {
                Ok(()) => return Ok(()),
                Err(e) => cause = e,
            }
        }
    }

    /// Connect, read the greeting, bind the device, replay settings and
    /// optionally start streaming.
    async fn connect_sequence(&self, inner: &mut Inner) -> LinkResult<()> {
        self.set_state(SessionState::Connecting);
        let addr = self.options.endpoint.to_string();
        info!("Connecting to {}", addr);
        let stream = self
            .guarded(self.options.connect_timeout, "connect", TcpStream::connect(&addr))
            .await?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(reader),
            writer,
        };

        self.set_state(SessionState::AwaitingGreeting);
        let greeting = self.read_response(&mut conn).await?;
        if greeting.verb != Verb::Device {
            return Err(LinkError::protocol(format!(
                "expected DEVICE greeting, got '{}'",
                greeting.to_line()
            )));
        }
        let mut reply = DeviceReply::parse(&greeting.body).map_err(LinkError::protocol)?;

        if let Some(hint) = &self.options.hint {
            let response = self
                .exchange(&mut conn, &Request::with_data(Verb::Device, hint.clone()))
                .await?;
            reply = DeviceReply::parse(&response.body).map_err(LinkError::protocol)?;
            if let DeviceReply::Unbound { error: reason } = &reply {
                let reason = reason
                    .clone()
                    .unwrap_or_else(|| "server bound no device".to_string());
                error!("Device creation failed for '{}': {}", hint, reason);
                return Err(LinkError::device_creation(reason));
            }
        }
        inner.summary = reply.summary().cloned();

        if inner.summary.is_some() {
            for request in inner.applied.requests() {
                let response = self.exchange(&mut conn, &request).await?;
                if let Err(e) = check_status(&response) {
                    warn!("Replaying '{}' failed: {}", request.to_line(), e);
                }
            }
            if self.options.auto_start {
                let response = self.exchange(&mut conn, &Request::new(Verb::Go)).await?;
                if let Err(e) = check_status(&response) {
                    warn!("Starting stream failed: {}", e);
                }
            }
        }

        inner.conn = Some(conn);
        inner.budget.reset();
        self.set_state(SessionState::Ready);
        match &inner.summary {
            Some(summary) => info!("Connected to {} ({})", addr, summary.name),
            None => info!("Connected to {} (no device bound)", addr),
        }
        Ok(())
    }

    async fn exchange(&self, conn: &mut Connection, request: &Request) -> LinkResult<Response> {
        let line = request.to_line();
        debug!("-> {}", line);
        let payload = format!("{}\n", line);
        let writer = &mut conn.writer;
        self.guarded(self.options.io_timeout, "write", async {
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await
        })
        .await?;

        let response = self.read_response(conn).await?;
        if response.verb != request.verb {
            return Err(LinkError::protocol(format!(
                "expected {} reply, got '{}'",
                request.verb,
                response.to_line()
            )));
        }
        Ok(response)
    }

    async fn read_response(&self, conn: &mut Connection) -> LinkResult<Response> {
        let line = self
            .guarded(
                self.options.io_timeout,
                "read",
                read_limited_line(&mut conn.reader, MAX_LINE_BYTES),
            )
            .await?
            .ok_or_else(|| LinkError::transport("connection closed by server"))?;
        debug!("<- {}", line.trim_end());
        parse_response(&line)
    }

    /// Run socket I/O under a timeout, giving up early on shutdown.
    async fn guarded<T, F>(&self, limit: Duration, what: &str, fut: F) -> LinkResult<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        let shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Err(LinkError::Shutdown);
        }
        tokio::select! {
            result = time::timeout(limit, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(LinkError::transport(format!("{} failed: {}", what, e))),
                Err(_) => Err(LinkError::transport(format!("{} timed out after {:?}", what, limit))),
            },
            _ = wait_for_shutdown(shutdown_rx) => Err(LinkError::Shutdown),
        }
    }

    /// Returns false if shutdown was requested during the sleep.
    async fn sleep_unless_shutdown(&self, duration: Duration) -> bool {
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = time::sleep(duration) => !self.shutdown_requested(),
            _ = wait_for_shutdown(shutdown_rx) => false,
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Session state: {} -> {}", previous, state);
        }
    }

    fn finish(&self, inner: &mut Inner) {
        inner.conn = None;
        if !self.is_closed() {
            info!("Session to {} closed", self.options.endpoint);
        }
        self.set_state(SessionState::Closed);
        self.eos_tx.send_replace(true);
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

/// Map a reply's status token onto a result carrying its data.
fn check_status(response: &Response) -> LinkResult<Option<&str>> {
    match response.status() {
        Some(Status::Ok) => Ok(response.data()),
        Some(Status::Fail) => Err(LinkError::operation(
            response.data().unwrap_or("request failed"),
        )),
        Some(Status::NoDevice) => Err(LinkError::DeviceAbsent),
        Some(Status::Unknown) => Err(LinkError::operation(format!(
            "server does not support {}",
            response.verb
        ))),
        None => Err(LinkError::protocol(format!(
            "malformed reply '{}'",
            response.to_line()
        ))),
    }
}

fn text(response: &Response) -> LinkResult<String> {
    check_status(response)?
        .map(str::to_string)
        .ok_or_else(|| LinkError::protocol(format!("{} reply carries no value", response.verb)))
}

fn number(response: &Response) -> LinkResult<f64> {
    let value = text(response)?;
    value
        .parse::<f64>()
        .map_err(|_| LinkError::protocol(format!("invalid {} value '{}'", response.verb, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex as StdMutex;

    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    const SUMMARY: &str = "fake|0|50|0.5|32000000|4096|RX1,RX2|SN1";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Plan {
        /// Accept and hang up before the greeting.
        Refuse,
        Serve,
        /// Hang up when a `PING` arrives.
        DropOnPing,
        /// Answer `DEVICE <hint>` with a creation failure.
        FailDevice,
        /// Never answer `FREQ`.
        Stall,
    }

    type Log = Arc<StdMutex<Vec<Vec<String>>>>;

    struct FakeServer {
        addr: SocketAddr,
        log: Log,
    }

    impl FakeServer {
        async fn start(plans: Vec<Plan>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let log: Log = Arc::new(StdMutex::new(Vec::new()));
            let accept_log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut plans = plans.into_iter();
                while let Ok((socket, _)) = listener.accept().await {
                    let plan = plans.next().unwrap_or(Plan::Serve);
                    let idx = {
                        let mut guard = accept_log.lock().unwrap();
                        guard.push(Vec::new());
                        guard.len() - 1
                    };
                    tokio::spawn(serve(socket, plan, idx, Arc::clone(&accept_log)));
                }
            });
            Self { addr, log }
        }

        fn lines(&self, connection: usize) -> Vec<String> {
            self.log.lock().unwrap()[connection].clone()
        }

        fn connections(&self) -> usize {
            self.log.lock().unwrap().len()
        }

        fn options(&self, attempts: i32) -> ClientOptions {
            let mut options = ClientOptions::new(RemoteEndpoint {
                host: "127.0.0.1".to_string(),
                port: self.addr.port(),
            });
            options.hint = Some("sim".to_string());
            options.reconnect = ReconnectPolicy::new(attempts, Duration::from_millis(10));
            options
        }
    }

    async fn serve(socket: TcpStream, plan: Plan, idx: usize, log: Log) {
        if plan == Plan::Refuse {
            return;
        }
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut bound = false;
        let (mut freq, mut gain, mut antenna) = (0.0f64, 0.0f64, "RX1".to_string());
        let mut header = "ON".to_string();

        if writer.write_all(b"DEVICE -\n").await.is_err() {
            return;
        }
        while let Ok(Some(line)) = lines.next_line().await {
            log.lock().unwrap()[idx].push(line.clone());
            let (verb, data) = match line.split_once(' ') {
                Some((verb, data)) => (verb.to_string(), Some(data.to_string())),
                None => (line.clone(), None),
            };
            let reply = match (verb.as_str(), data) {
                ("PING", _) if plan == Plan::DropOnPing => return,
                ("FREQ", Some(_)) if plan == Plan::Stall => {
                    std::future::pending::<()>().await;
                    return;
                }
                ("DEVICE", Some(_)) if plan == Plan::FailDevice => {
                    "DEVICE - open failed: no such device".to_string()
                }
                ("DEVICE", Some(_)) => {
                    bound = true;
                    format!("DEVICE {}", SUMMARY)
                }
                ("DEVICE", None) if bound => format!("DEVICE {}", SUMMARY),
                ("DEVICE", None) => "DEVICE -".to_string(),
                ("FREQ", Some(data)) => {
                    freq = data.parse().unwrap();
                    format!("FREQ OK {} {} 0 0", freq, freq)
                }
                ("FREQ", None) => format!("FREQ OK {}", freq),
                ("GAIN", Some(data)) => {
                    let value: f64 = data.parse().unwrap();
                    if value > 50.0 {
                        "GAIN FAIL gain out of range".to_string()
                    } else {
                        gain = value;
                        "GAIN OK".to_string()
                    }
                }
                ("GAIN", None) => format!("GAIN OK {}", gain),
                ("ANTENNA", Some(data)) => {
                    antenna = data;
                    "ANTENNA OK".to_string()
                }
                ("ANTENNA", None) => format!("ANTENNA OK {}", antenna),
                ("HEADER", Some(data)) => {
                    header = data;
                    "HEADER OK".to_string()
                }
                ("HEADER", None) => format!("HEADER OK {}", header),
                (verb, _) => format!("{} OK", verb),
            };
            if writer.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn connect_binds_hint_and_starts() {
        let server = FakeServer::start(vec![Plan::Serve]).await;
        let session = ClientSession::new(server.options(0));
        let summary = session.connect().await.unwrap().unwrap();
        assert_eq!(summary.name, "fake");
        assert_eq!(summary.antennas, vec!["RX1", "RX2"]);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(server.lines(0), vec!["DEVICE sim", "GO"]);
    }

    #[tokio::test]
    async fn auto_start_can_be_disabled() {
        let server = FakeServer::start(vec![Plan::Serve]).await;
        let mut options = server.options(0);
        options.auto_start = false;
        let session = ClientSession::new(options);
        session.connect().await.unwrap();
        assert_eq!(server.lines(0), vec!["DEVICE sim"]);
    }

    #[tokio::test]
    async fn calls_round_trip() {
        let server = FakeServer::start(vec![Plan::Serve]).await;
        let session = ClientSession::new(server.options(0));

        let (verdict, result) = session.set_freq(100_000_000.0).await.unwrap();
        assert_eq!(verdict, TuneVerdict::OnTarget);
        assert_eq!(result.actual_rf_hz, 100_000_000.0);
        assert_eq!(session.freq().await.unwrap(), 100_000_000.0);

        session.set_gain(12.5).await.unwrap();
        assert_eq!(session.gain().await.unwrap(), 12.5);
        session.set_antenna("RX2").await.unwrap();
        assert_eq!(session.antenna().await.unwrap(), "RX2");
        session.set_destination("-:40000").await.unwrap();
        session.set_header(false).await.unwrap();
        assert!(!session.header().await.unwrap());
        session.ping().await.unwrap();
        assert!(session.device_summary().await.unwrap().is_some());

        let lines = server.lines(0);
        assert!(lines.contains(&"DEST -:40000".to_string()));
        assert!(lines.contains(&"HEADER OFF".to_string()));
    }

    #[tokio::test]
    async fn operation_failure_keeps_session_ready() {
        let server = FakeServer::start(vec![Plan::Serve]).await;
        let session = ClientSession::new(server.options(0));
        session.set_gain(10.0).await.unwrap();

        let err = session.set_gain(99.0).await.unwrap_err();
        assert_eq!(err, LinkError::operation("gain out of range"));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.gain().await.unwrap(), 10.0);
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn initial_connect_uses_reconnect_budget() {
        let k = 2;
        let server = FakeServer::start(vec![Plan::Refuse, Plan::Refuse, Plan::Serve]).await;
        let session = ClientSession::new(server.options(k));
        assert!(session.connect().await.is_ok());
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(server.connections(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_is_terminal() {
        let server = FakeServer::start(vec![Plan::Refuse, Plan::Refuse, Plan::Serve]).await;
        let session = ClientSession::new(server.options(1));
        let eos = session.end_of_stream();
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(*eos.borrow());
        assert_eq!(session.ping().await.unwrap_err(), LinkError::Shutdown);
    }

    #[tokio::test]
    async fn fault_reconnects_and_replays_tuning() {
        let server =
            FakeServer::start(vec![Plan::DropOnPing, Plan::Refuse, Plan::Serve]).await;
        let session = ClientSession::new(server.options(2));

        session.set_antenna("RX2").await.unwrap();
        session.set_freq(100_000_000.0).await.unwrap();
        session.set_gain(20.0).await.unwrap();

        session.ping().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(server.connections(), 3);
        assert_eq!(
            server.lines(2),
            vec![
                "DEVICE sim",
                "ANTENNA RX2",
                "FREQ 100000000",
                "GAIN 20",
                "GO",
                "PING"
            ]
        );
        assert_eq!(session.freq().await.unwrap(), 100_000_000.0);
        assert_eq!(session.gain().await.unwrap(), 20.0);
        assert_eq!(session.antenna().await.unwrap(), "RX2");
    }

    #[tokio::test]
    async fn zero_attempts_fault_goes_terminal() {
        let server = FakeServer::start(vec![Plan::DropOnPing, Plan::Serve]).await;
        let session = ClientSession::new(server.options(0));
        let mut eos = session.end_of_stream();
        session.connect().await.unwrap();

        assert!(session.ping().await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
        tokio::time::timeout(Duration::from_secs(1), eos.wait_for(|done| *done))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn device_creation_failure_is_retried() {
        let server = FakeServer::start(vec![Plan::FailDevice, Plan::Serve]).await;
        let session = ClientSession::new(server.options(1));
        let summary = session.connect().await.unwrap();
        assert!(summary.is_some());
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn device_creation_failure_without_attempts_is_terminal() {
        let server = FakeServer::start(vec![Plan::FailDevice]).await;
        let session = ClientSession::new(server.options(0));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, LinkError::DeviceCreation(_)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn keepalive_pings_while_ready() {
        let server = FakeServer::start(vec![Plan::Serve]).await;
        let mut options = server.options(0);
        options.keepalive = Some(Duration::from_millis(20));
        let session = Arc::new(ClientSession::new(options));
        session.connect().await.unwrap();
        let handle = session.spawn_keepalive().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(server.lines(0).iter().any(|l| l == "PING"));

        session.close().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn close_interrupts_pending_call() {
        let server = FakeServer::start(vec![Plan::Stall]).await;
        let session = Arc::new(ClientSession::new(server.options(-1)));
        session.connect().await.unwrap();

        let caller = Arc::clone(&session);
        let pending = tokio::spawn(async move { caller.set_freq(1e6).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), LinkError::Shutdown);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(*session.end_of_stream().borrow());
    }

    #[test]
    fn replay_order_is_fixed() {
        let applied = Applied {
            destination: Some("-:5000".to_string()),
            header: Some(false),
            sample_rate: Some(2e6),
            antenna: Some("RX2".to_string()),
            freq_hz: Some(1e8),
            gain: Some(3.5),
        };
        let lines: Vec<String> = applied.requests().iter().map(Request::to_line).collect();
        assert_eq!(
            lines,
            vec![
                "DEST -:5000",
                "HEADER OFF",
                "RATE 2000000",
                "ANTENNA RX2",
                "FREQ 100000000",
                "GAIN 3.5"
            ]
        );
    }

    #[test]
    fn status_mapping() {
        let ok = parse_response("GAIN OK 4").unwrap();
        assert_eq!(check_status(&ok).unwrap(), Some("4"));
        let absent = parse_response("GAIN DEVICE").unwrap();
        assert_eq!(check_status(&absent).unwrap_err(), LinkError::DeviceAbsent);
        let garbage = parse_response("GAIN WHAT").unwrap();
        assert!(matches!(
            check_status(&garbage).unwrap_err(),
            LinkError::Protocol(_)
        ));
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod endpoint;
mod sample_stream;
mod session;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, warn};

use rxlink_app::{init_logging, ConfigFile};
use rxlink_core::transport::SAMPLE_BYTES;
use rxlink_core::{DynResult, LinkError};

use config::ClientConfig;
use endpoint::parse_remote_url;
use sample_stream::{SampleReceiver, StreamStats};
use session::{ClientOptions, ClientSession, SessionState};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - remote receiver client");
const SAMPLE_CHANNEL_BUFFER: usize = 256;
const METER_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Remote server URL (host:port)
    #[arg(short = 'u', long = "url")]
    url: Option<String>,
    /// Device hint sent to the server (e.g. "rtl 0", "sim gain=10")
    #[arg(short = 'd', long = "device", value_name = "HINT")]
    device: Option<String>,
    /// Frequency in Hz
    #[arg(short = 'f', long = "freq")]
    freq_hz: Option<f64>,
    /// Gain in dB
    #[arg(short = 'g', long = "gain")]
    gain: Option<f64>,
    /// Antenna name or index
    #[arg(short = 'a', long = "antenna")]
    antenna: Option<String>,
    /// Sample rate in samples per second
    #[arg(short = 'r', long = "rate")]
    sample_rate: Option<f64>,
    /// Reconnect attempts (0 = none, negative = unbounded)
    #[arg(long = "attempts", allow_hyphen_values = true)]
    attempts: Option<i32>,
    /// Do not send GO after connecting
    #[arg(long = "no-start")]
    no_start: bool,
    /// Local UDP port for samples
    #[arg(long = "udp-port")]
    udp_port: Option<u16>,
    /// Local address for the sample receiver
    #[arg(long = "udp-listen")]
    udp_listen: Option<IpAddr>,
    /// Ask for datagrams without the sequence header
    #[arg(long = "no-header")]
    no_header: bool,
    /// Write samples to FILE, or `-` for stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// Fold CLI overrides into the loaded config.
fn apply_cli(cli: &Cli, cfg: &mut ClientConfig) {
    if let Some(ref url) = cli.url {
        cfg.remote.url = Some(url.clone());
    }
    if let Some(ref hint) = cli.device {
        cfg.device.hint = Some(hint.clone());
    }
    if let Some(freq) = cli.freq_hz {
        cfg.device.freq_hz = Some(freq);
    }
    if let Some(gain) = cli.gain {
        cfg.device.gain = Some(gain);
    }
    if let Some(ref antenna) = cli.antenna {
        cfg.device.antenna = Some(antenna.clone());
    }
    if let Some(rate) = cli.sample_rate {
        cfg.device.sample_rate = Some(rate);
    }
    if cli.no_start {
        cfg.device.auto_start = false;
    }
    if let Some(attempts) = cli.attempts {
        cfg.reconnect.attempts = attempts;
    }
    if let Some(port) = cli.udp_port {
        cfg.stream.udp_port = port;
    }
    if let Some(listen) = cli.udp_listen {
        cfg.stream.udp_listen = listen;
    }
    if cli.no_header {
        cfg.stream.header = false;
    }
    if let Some(ref output) = cli.output {
        cfg.stream.output = Some(output.clone());
    }
    if let Some(ref level) = cli.log_level {
        cfg.general.log_level = Some(level.clone());
    }
}

fn session_options(cfg: &ClientConfig) -> DynResult<ClientOptions> {
    let url = cfg
        .remote
        .url
        .as_deref()
        .ok_or("Remote URL not specified. Use --url or set [remote].url in config.")?;
    let endpoint = parse_remote_url(url)?;
    let mut options = ClientOptions::new(endpoint);
    options.hint = cfg
        .device
        .hint
        .clone()
        .filter(|h| !h.trim().is_empty());
    options.auto_start = cfg.device.auto_start;
    options.reconnect = cfg.reconnect.policy();
    options.keepalive = cfg.reconnect.keepalive();
    Ok(options)
}

/// Framing the stream will use. A rejected `HEADER` leaves the server's
/// setting in place, so it is read back.
async fn negotiate_header(session: &ClientSession, wanted: bool) -> Result<bool, LinkError> {
    match session.set_header(wanted).await {
        Ok(()) => Ok(wanted),
        Err(e) if session.is_closed() => Err(e),
        Err(e) => {
            warn!("Setting header failed: {}", e);
            match session.header().await {
                Ok(actual) => Ok(actual),
                Err(e) if session.is_closed() => Err(e),
                Err(e) => {
                    warn!("Reading header failed, keeping header={}: {}", wanted, e);
                    Ok(wanted)
                }
            }
        }
    }
}

/// Point the stream at the local receiver and apply initial tuning. Returns
/// the negotiated framing.
///
/// Only a terminal session aborts; rejected settings are logged.
async fn configure(
    session: &ClientSession,
    cfg: &ClientConfig,
    udp_port: u16,
) -> Result<bool, LinkError> {
    let header = negotiate_header(session, cfg.stream.header).await?;
    let result = session.set_destination(&format!("-:{}", udp_port)).await;
    tolerate(session, "destination", result)?;

    if let Some(rate) = cfg.device.sample_rate {
        let result = session.set_sample_rate(rate).await;
        tolerate(session, "sample rate", result)?;
    }
    if let Some(ref antenna) = cfg.device.antenna {
        let result = session.set_antenna(antenna).await;
        tolerate(session, "antenna", result)?;
    }
    if let Some(freq) = cfg.device.freq_hz {
        let result = session.set_freq(freq).await.map(|(verdict, tuned)| {
            info!(
                "Tuned {} Hz -> {} Hz (verdict {})",
                tuned.target_rf_hz,
                tuned.actual_rf_hz,
                verdict.as_i8()
            );
        });
        tolerate(session, "frequency", result)?;
    }
    if let Some(gain) = cfg.device.gain {
        let result = session.set_gain(gain).await;
        tolerate(session, "gain", result)?;
    }
    Ok(header)
}

fn tolerate(
    session: &ClientSession,
    what: &str,
    result: Result<(), LinkError>,
) -> Result<(), LinkError> {
    match result {
        Err(e) if session.is_closed() => Err(e),
        Err(e) => {
            warn!("Setting {} failed: {}", what, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

async fn write_samples(
    output: String,
    mut samples_rx: broadcast::Receiver<Bytes>,
) -> std::io::Result<()> {
    let sink: Box<dyn AsyncWrite + Unpin + Send> = if output == "-" {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(tokio::fs::File::create(&output).await?)
    };
    let mut sink = BufWriter::new(sink);
    let target = if output == "-" { "stdout" } else { output.as_str() };
    info!("Writing samples to {}", target);
    loop {
        match samples_rx.recv().await {
            Ok(chunk) => sink.write_all(&chunk).await?,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Output fell behind, dropped {} datagrams", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    sink.flush().await
}

async fn meter(stats_rx: watch::Receiver<StreamStats>) {
    let mut ticker = time::interval(METER_INTERVAL);
    ticker.tick().await;
    let mut last = *stats_rx.borrow();
    loop {
        ticker.tick().await;
        let now = *stats_rx.borrow();
        let bytes = now.bytes.saturating_sub(last.bytes);
        let samples_per_sec = (bytes / SAMPLE_BYTES as u64) as f64 / METER_INTERVAL.as_secs_f64();
        info!(
            "Receiving {:.1} kS/s ({} packets, {} lost, {} restarts)",
            samples_per_sec / 1000.0,
            now.packets,
            now.lost,
            now.restarts
        );
        last = now;
    }
}

/// Operator-facing view of connection loss and recovery.
#[derive(Debug, Default)]
struct StateReport {
    recovering: bool,
}

impl StateReport {
    fn observe(&mut self, state: SessionState) -> Option<&'static str> {
        match state {
            SessionState::Faulted if !self.recovering => {
                self.recovering = true;
                Some("Connection to server lost, recovering")
            }
            SessionState::Ready if self.recovering => {
                self.recovering = false;
                Some("Connection to server restored")
            }
            _ => None,
        }
    }
}

async fn report_state(mut state_rx: watch::Receiver<SessionState>) {
    let mut report = StateReport::default();
    while state_rx.changed().await.is_ok() {
        let state = *state_rx.borrow_and_update();
        if let Some(notice) = report.observe(state) {
            info!("{}", notice);
        }
    }
}

async fn wait_for_end(mut eos_rx: watch::Receiver<bool>) {
    let _ = eos_rx.wait_for(|done| *done).await;
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ClientConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_source) = ClientConfig::load(cli.config.as_deref())?;
    apply_cli(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid client configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    info!("Configuration: {}", config_source);

    let options = session_options(&cfg)?;
    info!("Starting rxlink-client (server: {})", options.endpoint);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();

    let receiver =
        SampleReceiver::bind(SocketAddr::from((cfg.stream.udp_listen, cfg.stream.udp_port)))
            .await?;
    let udp_port = receiver.local_addr()?.port();
    let (samples_tx, _) = broadcast::channel::<Bytes>(SAMPLE_CHANNEL_BUFFER);
    let (stats_tx, stats_rx) = watch::channel(StreamStats::default());

    if let Some(output) = cfg.stream.output.clone() {
        let samples_rx = samples_tx.subscribe();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = write_samples(output, samples_rx).await {
                error!("Sample output error: {:?}", e);
            }
        }));
    } else {
        task_handles.push(tokio::spawn(meter(stats_rx)));
    }

    let session = Arc::new(ClientSession::new(options));
    let eos_rx = session.end_of_stream();
    task_handles.push(tokio::spawn(report_state(session.watch_state())));

    let setup = async {
        match session.connect().await? {
            Some(summary) => info!(
                "Device: {} (gain {}..{} step {}, antennas {})",
                summary.name,
                summary.gain.min,
                summary.gain.max,
                summary.gain.step,
                summary.antennas.join(",")
            ),
            None => warn!("Server has no device bound"),
        }
        configure(&session, &cfg, udp_port).await
    };
    let setup_result = tokio::select! {
        result = setup => Some(result),
        _ = signal::ctrl_c() => None,
    };
    match setup_result {
        Some(Ok(header)) => {
            let receiver_shutdown_rx = shutdown_rx.clone();
            task_handles.push(tokio::spawn(async move {
                if let Err(e) = receiver
                    .run(header, samples_tx, stats_tx, receiver_shutdown_rx)
                    .await
                {
                    error!("Sample receiver error: {:?}", e);
                }
            }));
            if let Some(handle) = session.spawn_keepalive() {
                task_handles.push(handle);
            }
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Ctrl+C received, shutting down");
                }
                _ = wait_for_end(eos_rx) => {
                    warn!("Server connection lost for good, end of stream");
                }
            }
        }
        Some(Err(e)) => error!("Session setup failed: {}", e),
        None => info!("Ctrl+C received, shutting down"),
    }

    if !session.is_closed() {
        let _ = session.stop().await;
    }
    session.close().await;
    let _ = shutdown_tx.send(true);
    time::sleep(Duration::from_millis(200)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "rxlink-client",
            "-u",
            "radio:28888",
            "-d",
            "sim",
            "-f",
            "433920000",
            "--attempts",
            "-1",
            "--no-header",
            "-o",
            "-",
        ]);
        let mut cfg = ClientConfig::default();
        apply_cli(&cli, &mut cfg);
        assert_eq!(cfg.remote.url.as_deref(), Some("radio:28888"));
        assert_eq!(cfg.device.hint.as_deref(), Some("sim"));
        assert_eq!(cfg.device.freq_hz, Some(433_920_000.0));
        assert_eq!(cfg.reconnect.attempts, -1);
        assert!(!cfg.stream.header);
        assert_eq!(cfg.stream.output.as_deref(), Some("-"));
    }

    #[test]
    fn options_require_url() {
        assert!(session_options(&ClientConfig::default()).is_err());

        let mut cfg = ClientConfig::default();
        cfg.remote.url = Some("tcp://127.0.0.1:5000".to_string());
        cfg.device.hint = Some("  ".to_string());
        cfg.reconnect.attempts = 3;
        let options = session_options(&cfg).unwrap();
        assert_eq!(options.endpoint.port, 5000);
        assert_eq!(options.hint, None);
        assert_eq!(options.reconnect.attempts(), 3);
    }

    #[tokio::test]
    async fn rejected_header_uses_server_framing() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer.write_all(b"DEVICE -\n").await.unwrap();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match line.as_str() {
                    "HEADER ON" => "HEADER FAIL framing not supported",
                    "HEADER" => "HEADER OK OFF",
                    _ => "PING OK",
                };
                writer
                    .write_all(format!("{}\n", reply).as_bytes())
                    .await
                    .unwrap();
            }
        });

        let mut options = ClientOptions::new(parse_remote_url(&addr.to_string()).unwrap());
        options.auto_start = false;
        let session = ClientSession::new(options);
        session.connect().await.unwrap();
        assert!(!negotiate_header(&session, true).await.unwrap());
        assert!(!session.is_closed());
    }

    #[test]
    fn state_report_announces_loss_and_recovery_once() {
        let mut report = StateReport::default();
        assert_eq!(report.observe(SessionState::Connecting), None);
        assert_eq!(report.observe(SessionState::Ready), None);
        assert!(report.observe(SessionState::Faulted).unwrap().contains("lost"));
        assert_eq!(report.observe(SessionState::Reconnecting), None);
        assert_eq!(report.observe(SessionState::Faulted), None);
        assert!(report.observe(SessionState::Ready).unwrap().contains("restored"));
        assert_eq!(report.observe(SessionState::Ready), None);
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod listener;
mod session;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use rxlink_app::{init_logging, load_backend_plugins, ConfigFile};
use rxlink_backend::{
    register_builtin_backends_on, DefaultHintResolver, DeviceFactory, RegistrationContext,
};
use rxlink_core::DynResult;

use config::ServerConfig;
use listener::ControlServer;
use session::{SessionContext, SharedRadio};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - receiver control server");
const SHUTDOWN_GRACE_MS: u64 = 400;

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
    /// IP address for the control listener
    #[arg(short = 'l', long = "listen")]
    listen: Option<IpAddr>,
    /// Port for the control listener
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Hint used when a client asks for the default device
    #[arg(short = 'd', long = "device", value_name = "HINT")]
    device: Option<String>,
    /// Build the default device once and share it with every client
    #[arg(long = "locked")]
    locked: bool,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

/// Fold CLI overrides into the loaded config.
fn apply_cli(cli: &Cli, cfg: &mut ServerConfig) {
    if let Some(listen) = cli.listen {
        cfg.listen.listen = listen;
    }
    if let Some(port) = cli.port {
        cfg.listen.port = port;
    }
    if let Some(ref hint) = cli.device {
        cfg.device.default_hint = Some(hint.clone());
    }
    if cli.locked {
        cfg.device.locked = true;
    }
    if let Some(ref level) = cli.log_level {
        cfg.general.log_level = Some(level.clone());
    }
}

fn build_factory(cfg: &ServerConfig, registry: RegistrationContext) -> DeviceFactory {
    let resolver = DefaultHintResolver::new(
        cfg.hint.index_backend.trim(),
        cfg.hint.addressed_backend.trim(),
    );
    DeviceFactory::new(Arc::new(registry))
        .with_resolver(Arc::new(resolver))
        .with_samples_per_packet(cfg.transport.samples_per_packet)
        .with_default_hint(cfg.device.default_hint.clone())
}

fn open_locked_device(factory: &DeviceFactory) -> DynResult<SharedRadio> {
    let radio = factory
        .create_device("")
        .map_err(|e| format!("Locked device could not be created: {}", e))?;
    info!("Locked mode: sharing device {}", radio.hint);
    Ok(Arc::new(Mutex::new(radio)))
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut bootstrap_ctx = RegistrationContext::new();
    register_builtin_backends_on(&mut bootstrap_ctx);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_source) = ServerConfig::load(cli.config.as_deref())?;
    apply_cli(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    let bootstrap_ctx_ptr = NonNull::from(&mut bootstrap_ctx).cast();
    let plugins = load_backend_plugins(bootstrap_ctx_ptr);

    info!("Configuration: {}", config_source);
    if !plugins.is_empty() {
        let paths: Vec<String> = plugins.paths().map(|p| p.display().to_string()).collect();
        info!(
            "{} backend plugin(s) loaded: {}",
            plugins.len(),
            paths.join(", ")
        );
    }
    for (id, summary) in bootstrap_ctx.describe() {
        info!("Backend {}: {}", id, summary);
    }

    let factory = build_factory(&cfg, bootstrap_ctx);
    let locked = if cfg.device.locked {
        Some(open_locked_device(&factory)?)
    } else {
        None
    };

    let idle_timeout = match cfg.session.idle_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let ctx = Arc::new(SessionContext {
        factory,
        locked,
        default_port: cfg.transport.default_port,
        idle_timeout,
    });

    let listen_addr = SocketAddr::from((cfg.listen.listen, cfg.listen.port));
    let server = ControlServer::bind(listen_addr, Arc::clone(&ctx)).await?;
    info!(
        "Starting rxlink-server (default device: {}, locked: {})",
        cfg.device.default_hint.as_deref().unwrap_or("-"),
        cfg.device.locked
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            error!("Listener error: {:?}", e);
        }
    });

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;

    if !server_handle.is_finished() {
        server_handle.abort();
    }
    let _ = server_handle.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "rxlink-server",
            "-p",
            "5555",
            "--device",
            "sim gain=3",
            "--locked",
            "--log-level",
            "debug",
        ]);
        let mut cfg = ServerConfig::default();
        apply_cli(&cli, &mut cfg);
        assert_eq!(cfg.listen.port, 5555);
        assert_eq!(cfg.device.default_hint.as_deref(), Some("sim gain=3"));
        assert!(cfg.device.locked);
        assert_eq!(cfg.general.log_level.as_deref(), Some("debug"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn locked_device_uses_default_hint() {
        let mut cfg = ServerConfig::default();
        cfg.device.default_hint = Some("sim name=shared".to_string());
        let mut registry = RegistrationContext::new();
        register_builtin_backends_on(&mut registry);
        let factory = build_factory(&cfg, registry);
        let radio = open_locked_device(&factory).unwrap();
        let guard = radio.lock().unwrap();
        assert_eq!(guard.device.name().unwrap(), "shared");
    }

    #[test]
    fn resolver_follows_hint_section() {
        let mut cfg = ServerConfig::default();
        cfg.hint.index_backend = "sim".to_string();
        let mut registry = RegistrationContext::new();
        register_builtin_backends_on(&mut registry);
        let factory = build_factory(&cfg, registry);
        assert_eq!(factory.parse("0").unwrap().backend, "sim");
        assert_eq!(factory.parse("addr=10.0.0.2").unwrap().backend, "USRP");
    }
}

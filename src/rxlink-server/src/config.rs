// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for rxlink-server.
//!
//! Config is loaded from the `[rxlink-server]` section of `rxlink.toml`.
//! Lookup order:
//! 1. Path specified via `--config` CLI argument
//! 2. `$RXLINK_CONFIG`
//! 3. `./rxlink.toml`
//! 4. `~/.config/rxlink/rxlink.toml`
//! 5. `/etc/rxlink/rxlink.toml`

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use rxlink_app::ConfigFile;
use rxlink_core::transport::{DEFAULT_SAMPLES_PER_PACKET, DEFAULT_STREAM_PORT};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// TCP control listener
    pub listen: ListenConfig,
    /// Device selection and sharing
    pub device: DeviceConfig,
    /// Hint resolution
    pub hint: HintConfig,
    /// UDP sample stream defaults
    pub transport: TransportConfig,
    /// Per-session behavior
    pub session: SessionConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// IP address to listen on
    pub listen: IpAddr,
    /// TCP port to listen on
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 28888,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hint used when a client sends an empty or `-` hint
    pub default_hint: Option<String>,
    /// Share one device built from `default_hint` across all sessions
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HintConfig {
    /// Backend for purely numeric hints
    pub index_backend: String,
    /// Backend for `key=value` hints
    pub addressed_backend: String,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            index_backend: "RTL".to_string(),
            addressed_backend: "USRP".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Samples carried per UDP datagram (before the size ceiling applies)
    pub samples_per_packet: usize,
    /// Port used when `DEST` omits one
    pub default_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            samples_per_packet: DEFAULT_SAMPLES_PER_PACKET,
            default_port: DEFAULT_STREAM_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Close a session after this many seconds without a request; 0 disables
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.listen.port == 0 {
            return Err("[listen].port must be > 0".to_string());
        }
        if self.device.locked
            && self
                .device
                .default_hint
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err("[device].locked requires [device].default_hint".to_string());
        }
        if self.hint.index_backend.trim().is_empty() {
            return Err("[hint].index_backend must not be empty".to_string());
        }
        if self.hint.addressed_backend.trim().is_empty() {
            return Err("[hint].addressed_backend must not be empty".to_string());
        }
        if self.transport.samples_per_packet == 0 {
            return Err("[transport].samples_per_packet must be > 0".to_string());
        }
        if self.transport.default_port == 0 {
            return Err("[transport].default_port must be > 0".to_string());
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[rxlink-server]`
    /// section header.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "rxlink-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            device: DeviceConfig {
                default_hint: Some("sim lo_error=100,tolerance=50".to_string()),
                locked: false,
            },
            ..ServerConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "rxlink-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.port, 28888);
        assert!(!config.device.locked);
        assert_eq!(config.device.default_hint, None);
        assert_eq!(config.hint.index_backend, "RTL");
        assert_eq!(config.transport.samples_per_packet, 4096);
        assert_eq!(config.transport.default_port, 28888);
        assert_eq!(config.session.idle_timeout_secs, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[listen]
listen = "127.0.0.1"
port = 5000

[device]
default_hint = "sim gain=10"
locked = true

[hint]
index_backend = "sim"
addressed_backend = "tone"

[transport]
samples_per_packet = 1024
default_port = 30000

[session]
idle_timeout_secs = 60
"#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, Some("debug".to_string()));
        assert_eq!(config.listen.port, 5000);
        assert_eq!(config.device.default_hint.as_deref(), Some("sim gain=10"));
        assert!(config.device.locked);
        assert_eq!(config.hint.addressed_backend, "tone");
        assert_eq!(config.transport.samples_per_packet, 1024);
        assert_eq!(config.transport.default_port, 30000);
        assert_eq!(config.session.idle_timeout_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.device.locked = true;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.transport.samples_per_packet = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.listen.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_toml_round_trips() {
        let text = ServerConfig::example_toml();
        let table: toml::Table = toml::from_str(&text).unwrap();
        let section = table.get("rxlink-server").unwrap();
        let config: ServerConfig = section.clone().try_into().unwrap();
        assert!(config.validate().is_ok());
        assert!(config.device.default_hint.is_some());
    }
}

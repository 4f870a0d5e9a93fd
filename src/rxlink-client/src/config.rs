// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for rxlink-client.
//!
//! Config is loaded from the `[rxlink-client]` section of `rxlink.toml`,
//! searched the same way as the server's.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rxlink_app::ConfigFile;
use rxlink_core::ReconnectPolicy;

/// Top-level client configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Remote connection settings
    pub remote: RemoteConfig,
    /// Device to request and initial tuning
    pub device: DeviceConfig,
    /// Reconnect and keepalive behavior
    pub reconnect: ReconnectConfig,
    /// Local sample receiver
    pub stream: StreamConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Remote connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote URL (host:port or tcp://host:port).
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hint sent with `DEVICE`; `None` keeps whatever the server binds
    pub hint: Option<String>,
    pub freq_hz: Option<f64>,
    pub gain: Option<f64>,
    pub antenna: Option<String>,
    pub sample_rate: Option<f64>,
    /// Send `GO` once the device is configured
    pub auto_start: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hint: None,
            freq_hz: None,
            gain: None,
            antenna: None,
            sample_rate: None,
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// 0 = never, N = at most N attempts, negative = forever
    pub attempts: i32,
    /// Delay between attempts in milliseconds
    pub interval_ms: u64,
    /// `PING` interval in milliseconds; 0 disables keepalive
    pub keepalive_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            attempts: -1,
            interval_ms: 2000,
            keepalive_ms: 5000,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.attempts, Duration::from_millis(self.interval_ms))
    }

    pub fn keepalive(&self) -> Option<Duration> {
        match self.keepalive_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Local address for the UDP receiver
    pub udp_listen: IpAddr,
    /// Local UDP port; 0 picks an ephemeral one
    pub udp_port: u16,
    /// Ask the server to prefix datagrams with the sequence header
    pub header: bool,
    /// Where samples go: a file path, `-` for stdout, unset to only meter
    pub output: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            udp_listen: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            udp_port: 0,
            header: true,
            output: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if let Some(url) = &self.remote.url {
            if url.trim().is_empty() {
                return Err("[remote].url must not be empty".to_string());
            }
        }
        if let Some(freq) = self.device.freq_hz {
            if !freq.is_finite() || freq < 0.0 {
                return Err("[device].freq_hz must be a non-negative number".to_string());
            }
        }
        if let Some(rate) = self.device.sample_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err("[device].sample_rate must be > 0".to_string());
            }
        }
        if self.reconnect.attempts != 0 && self.reconnect.interval_ms == 0 {
            return Err("[reconnect].interval_ms must be > 0 when reconnecting".to_string());
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[rxlink-client]`
    /// section header.
    pub fn example_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "rxlink-client")]
            inner: ClientConfig,
        }
        let example = ClientConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            remote: RemoteConfig {
                url: Some("tcp://127.0.0.1:28888".to_string()),
            },
            device: DeviceConfig {
                hint: Some("sim".to_string()),
                freq_hz: Some(100_000_000.0),
                gain: Some(20.0),
                antenna: Some("RX1".to_string()),
                ..DeviceConfig::default()
            },
            stream: StreamConfig {
                output: Some("-".to_string()),
                ..StreamConfig::default()
            },
            ..ClientConfig::default()
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

impl ConfigFile for ClientConfig {
    fn section_key() -> &'static str {
        "rxlink-client"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.remote.url.is_none());
        assert!(config.device.auto_start);
        assert_eq!(config.reconnect.attempts, -1);
        assert_eq!(config.reconnect.keepalive(), Some(Duration::from_secs(5)));
        assert!(config.stream.header);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[remote]
url = "radio.local:28888"

[device]
hint = "rtl 0"
freq_hz = 433920000
gain = 12.5
auto_start = false

[reconnect]
attempts = 3
interval_ms = 250
keepalive_ms = 0

[stream]
udp_port = 40000
header = false
output = "capture.iq"
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.remote.url.as_deref(), Some("radio.local:28888"));
        assert_eq!(config.device.hint.as_deref(), Some("rtl 0"));
        assert_eq!(config.device.freq_hz, Some(433_920_000.0));
        assert!(!config.device.auto_start);
        assert_eq!(config.reconnect.policy().attempts(), 3);
        assert_eq!(
            config.reconnect.policy().interval(),
            Duration::from_millis(250)
        );
        assert_eq!(config.reconnect.keepalive(), None);
        assert_eq!(config.stream.udp_port, 40000);
        assert_eq!(config.stream.output.as_deref(), Some("capture.iq"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.device.sample_rate = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.reconnect.interval_ms = 0;
        assert!(config.validate().is_err());
        config.reconnect.attempts = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_toml_round_trips() {
        let text = ClientConfig::example_toml();
        let table: toml::Table = toml::from_str(&text).unwrap();
        let section = table.get("rxlink-client").unwrap();
        let config: ClientConfig = section.clone().try_into().unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.hint.as_deref(), Some("sim"));
    }
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! `rxlink.toml` lookup shared by the server and the client.
//!
//! Both binaries read one file; each owns a top-level table named after the
//! binary. Lookup order: explicit `--config` path, `RXLINK_CONFIG`, then
//! `./rxlink.toml`, `$XDG_CONFIG_HOME/rxlink/rxlink.toml`,
//! `/etc/rxlink/rxlink.toml`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

const CONFIG_ENV: &str = "RXLINK_CONFIG";
const CONFIG_FILE_NAME: &str = "rxlink.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Config file {0} has no [{1}] section")]
    MissingSection(PathBuf, &'static str),
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path given on the command line.
    Explicit(PathBuf),
    /// Path taken from `RXLINK_CONFIG`.
    Environment(PathBuf),
    /// First search path holding the section.
    Searched(PathBuf),
    /// Nothing found; built-in defaults.
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Environment(p) | ConfigSource::Searched(p) => {
                Some(p)
            }
            ConfigSource::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Explicit(p) => write!(f, "{} (command line)", p.display()),
            ConfigSource::Environment(p) => write!(f, "{} (${})", p.display(), CONFIG_ENV),
            ConfigSource::Searched(p) => write!(f, "{}", p.display()),
            ConfigSource::Defaults => f.write_str("built-in defaults"),
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("rxlink").join(CONFIG_FILE_NAME));
    }
    paths.push(Path::new("/etc/rxlink").join(CONFIG_FILE_NAME));
    paths
}

/// Deserialize table `key` out of TOML text. `Ok(None)` if the table is
/// absent.
fn section_from_str<T: DeserializeOwned>(
    origin: &Path,
    text: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let parse_err = |e: toml::de::Error| ConfigError::ParseError(origin.to_path_buf(), e.to_string());

    let mut root: toml::Table = toml::from_str(text).map_err(parse_err)?;
    match root.remove(key) {
        Some(section) => section.try_into::<T>().map(Some).map_err(parse_err),
        None => Ok(None),
    }
}

fn section_from_file<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    section_from_str(path, &text, key)
}

/// A binary's table in `rxlink.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Table name, e.g. `"rxlink-server"`.
    fn section_key() -> &'static str;

    /// Load from one file; the table must be present.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        section_from_file(path, Self::section_key())?
            .ok_or_else(|| ConfigError::MissingSection(path.to_path_buf(), Self::section_key()))
    }

    /// Resolve the configuration following the documented lookup order.
    ///
    /// Explicit and environment paths must exist and hold the table. Search
    /// paths are skipped when missing or when they lack the table.
    fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        if let Some(path) = explicit {
            return Ok((
                Self::load_from_file(path)?,
                ConfigSource::Explicit(path.to_path_buf()),
            ));
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            let path = PathBuf::from(path);
            return Ok((
                Self::load_from_file(&path)?,
                ConfigSource::Environment(path),
            ));
        }

        for path in search_paths() {
            if !path.is_file() {
                continue;
            }
            if let Some(cfg) = section_from_file(&path, Self::section_key())? {
                return Ok((cfg, ConfigSource::Searched(path)));
            }
        }
        Ok((Self::default(), ConfigSource::Defaults))
    }
}

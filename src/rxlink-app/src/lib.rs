// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod config;
pub mod logging;
pub mod plugins;

pub use config::{ConfigError, ConfigFile, ConfigSource};
pub use logging::init_logging;
pub use plugins::{load_backend_plugins, PluginSet};

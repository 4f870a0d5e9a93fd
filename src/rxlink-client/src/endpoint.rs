// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use rxlink_core::Destination;

const DEFAULT_CONTROL_PORT: u16 = 28888;

/// Control server address; same grammar and formatting as a stream
/// destination.
pub type RemoteEndpoint = Destination;

/// Parse `host`, `host:port`, `[v6]:port`, optionally prefixed with `tcp://`.
pub fn parse_remote_url(url: &str) -> Result<RemoteEndpoint, String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err("remote url is empty".into());
    }

    let addr = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
    Destination::parse(addr.trim_end_matches('/'), DEFAULT_CONTROL_PORT)
        .map_err(|e| format!("invalid remote url '{}': {}", trimmed, e))
}

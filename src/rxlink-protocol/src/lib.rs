// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line protocol for the rxlink control channel.
//!
//! Requests are `VERB[ DATA]`, responses `VERB RESULT[ DATA]`, one per
//! newline-terminated ASCII line.

pub mod codec;
pub mod summary;
pub mod types;

pub use codec::{
    format_hz, format_tune_reply, parse_on_off, parse_request, parse_response, parse_tune_reply,
    read_limited_line, RejectedLine, MAX_LINE_BYTES,
};
pub use summary::{DeviceReply, DeviceSummary};
pub use types::{Request, Response, Status, Verb};

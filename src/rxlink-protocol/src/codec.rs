// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line parsing/formatting for requests, responses and tune replies.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use rxlink_core::{LinkError, LinkResult, TuneResult, TuneVerdict};

use crate::types::{Request, Response, Verb};

/// Upper bound for a single control line, newline included.
pub const MAX_LINE_BYTES: usize = 4 * 1024;

fn split_verb(line: &str) -> Option<(&str, Option<&str>)> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => {
            let rest = rest.trim();
            Some((verb, if rest.is_empty() { None } else { Some(rest) }))
        }
        None => Some((trimmed, None)),
    }
}

/// Parse a request line `VERB[ DATA]`.
pub fn parse_request(line: &str) -> LinkResult<Request> {
    let (verb, data) = split_verb(line).ok_or_else(|| LinkError::protocol("empty request"))?;
    Ok(Request {
        verb: Verb::parse(verb),
        data: data.map(str::to_string),
    })
}

/// Parse a response line `VERB RESULT[ DATA]`.
pub fn parse_response(line: &str) -> LinkResult<Response> {
    let (verb, body) = split_verb(line).ok_or_else(|| LinkError::protocol("empty response"))?;
    Ok(Response {
        verb: Verb::parse(verb),
        body: body.unwrap_or_default().to_string(),
    })
}

/// Format a frequency/gain/rate value. Integral values carry no fraction.
pub fn format_hz(value: f64) -> String {
    format!("{}", value)
}

/// Body data of a successful `FREQ` set: optional verdict token then
/// target/actual RF and target/actual baseband offset.
pub fn format_tune_reply(verdict: TuneVerdict, result: &TuneResult) -> String {
    let values = format!(
        "{} {} {} {}",
        format_hz(result.target_rf_hz),
        format_hz(result.actual_rf_hz),
        format_hz(result.target_baseband_hz),
        format_hz(result.actual_baseband_hz),
    );
    match verdict.token() {
        Some(token) => format!("{} {}", token, values),
        None => values,
    }
}

pub fn parse_tune_reply(data: &str) -> LinkResult<(TuneVerdict, TuneResult)> {
    let mut tokens: Vec<&str> = data.split_whitespace().collect();
    let verdict = match tokens.first().and_then(|t| TuneVerdict::from_token(t)) {
        Some(verdict) => {
            tokens.remove(0);
            verdict
        }
        None => TuneVerdict::OnTarget,
    };
    if tokens.len() != 4 {
        return Err(LinkError::protocol(format!(
            "tune reply has {} values, expected 4",
            tokens.len()
        )));
    }
    let mut values = [0.0f64; 4];
    for (slot, token) in values.iter_mut().zip(&tokens) {
        *slot = token
            .parse()
            .map_err(|_| LinkError::protocol(format!("invalid tune value '{}'", token)))?;
    }
    Ok((
        verdict,
        TuneResult {
            target_rf_hz: values[0],
            actual_rf_hz: values[1],
            target_baseband_hz: values[2],
            actual_baseband_hz: values[3],
        },
    ))
}

/// `ON`/`OFF` (also `1`/`0`, `TRUE`/`FALSE`).
pub fn parse_on_off(input: &str) -> Option<bool> {
    match input.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" | "TRUE" | "YES" => Some(true),
        "OFF" | "0" | "FALSE" | "NO" => Some(false),
        _ => None,
    }
}

/// Leading bytes inspected when naming a rejected line's verb.
const VERB_PREFIX_BYTES: usize = 32;

/// A line that was read in full but cannot be served, either over-long or
/// not UTF-8. Travels inside an [`std::io::ErrorKind::InvalidData`] error
/// from [`read_limited_line`]; the reader is left at the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// Upper-cased leading token, when the line starts with one.
    pub verb: Option<String>,
    pub reason: String,
}

impl RejectedLine {
    fn new(prefix: &[u8], reason: String) -> Self {
        let head = String::from_utf8_lossy(&prefix[..prefix.len().min(VERB_PREFIX_BYTES)]);
        let verb = head
            .split_whitespace()
            .next()
            .filter(|token| token.bytes().all(|b| b.is_ascii_alphabetic()))
            .map(str::to_ascii_uppercase);
        Self { verb, reason }
    }

    /// The rejection carried by `err`, if any.
    pub fn from_io(err: &std::io::Error) -> Option<&RejectedLine> {
        err.get_ref()?.downcast_ref::<RejectedLine>()
    }

    fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, self)
    }
}

impl std::fmt::Display for RejectedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for RejectedLine {}

/// Read one `\n`-terminated line of at most `max_bytes`.
///
/// Returns `Ok(None)` on a clean EOF before any byte was read. An over-long
/// line is consumed through its newline before the error is returned.
pub async fn read_limited_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> std::io::Result<Option<String>> {
    let mut line = Vec::with_capacity(128);
    let mut overflow = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if overflow {
                return Err(too_long(&line, max_bytes));
            }
            if line.is_empty() {
                return Ok(None);
            }
            return into_text(line).map(Some);
        }

        let (taken, complete) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if !overflow && line.len() + taken > max_bytes {
            overflow = true;
            let room = max_bytes.saturating_sub(line.len());
            line.extend_from_slice(&available[..room]);
        } else if !overflow {
            line.extend_from_slice(&available[..taken]);
        }
        reader.consume(taken);

        if complete {
            if overflow {
                return Err(too_long(&line, max_bytes));
            }
            return into_text(line).map(Some);
        }
    }
}

fn into_text(line: Vec<u8>) -> std::io::Result<String> {
    String::from_utf8(line).map_err(|e| {
        RejectedLine::new(e.as_bytes(), format!("line is not valid UTF-8: {}", e.utf8_error()))
            .into_io()
    })
}

fn too_long(prefix: &[u8], max_bytes: usize) -> std::io::Error {
    RejectedLine::new(prefix, format!("line exceeds maximum size of {max_bytes} bytes")).into_io()
}

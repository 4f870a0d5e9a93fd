// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Request/response types for the control line protocol.

use std::fmt;

use crate::summary::DeviceReply;

/// Control verbs. Unrecognized verbs are kept verbatim so the reply can echo
/// them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    Device,
    Go,
    Stop,
    Freq,
    Gain,
    Rate,
    Antenna,
    Dest,
    Header,
    Ping,
    Other(String),
}

impl Verb {
    /// Parse a verb token, case-insensitively.
    pub fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "DEVICE" => Verb::Device,
            "GO" => Verb::Go,
            "STOP" => Verb::Stop,
            "FREQ" => Verb::Freq,
            "GAIN" => Verb::Gain,
            "RATE" => Verb::Rate,
            "ANTENNA" => Verb::Antenna,
            "DEST" => Verb::Dest,
            "HEADER" => Verb::Header,
            "PING" => Verb::Ping,
            other => Verb::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verb::Device => "DEVICE",
            Verb::Go => "GO",
            Verb::Stop => "STOP",
            Verb::Freq => "FREQ",
            Verb::Gain => "GAIN",
            Verb::Rate => "RATE",
            Verb::Antenna => "ANTENNA",
            Verb::Dest => "DEST",
            Verb::Header => "HEADER",
            Verb::Ping => "PING",
            Verb::Other(s) => s,
        }
    }

    /// Whether the verb operates on a bound device.
    pub fn needs_device(&self) -> bool {
        !matches!(self, Verb::Device | Verb::Ping | Verb::Other(_))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub verb: Verb,
    pub data: Option<String>,
}

impl Request {
    pub fn new(verb: Verb) -> Self {
        Self { verb, data: None }
    }

    pub fn with_data(verb: Verb, data: impl Into<String>) -> Self {
        let data = data.into();
        let data = if data.trim().is_empty() {
            None
        } else {
            Some(data)
        };
        Self { verb, data }
    }

    /// Line text without the trailing newline.
    pub fn to_line(&self) -> String {
        match &self.data {
            Some(data) => format!("{} {}", self.verb, data),
            None => self.verb.to_string(),
        }
    }
}

/// Leading result token of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Fail,
    /// The command needs a device and none is bound.
    NoDevice,
    Unknown,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Fail => "FAIL",
            Status::NoDevice => "DEVICE",
            Status::Unknown => "UNKNOWN",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "OK" => Some(Status::Ok),
            "FAIL" => Some(Status::Fail),
            "DEVICE" => Some(Status::NoDevice),
            "UNKNOWN" => Some(Status::Unknown),
            _ => None,
        }
    }
}

/// A single control response: the echoed verb plus a body.
///
/// For `DEVICE` the body is a device reply (summary or `-`); for every other
/// verb it starts with a [`Status`] token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub verb: Verb,
    pub body: String,
}

impl Response {
    pub fn ok(verb: Verb) -> Self {
        Self {
            verb,
            body: Status::Ok.as_str().to_string(),
        }
    }

    pub fn ok_with(verb: Verb, data: impl fmt::Display) -> Self {
        Self {
            verb,
            body: format!("{} {}", Status::Ok.as_str(), data),
        }
    }

    pub fn fail(verb: Verb, message: Option<&str>) -> Self {
        let body = match message.map(sanitize).filter(|m| !m.is_empty()) {
            Some(msg) => format!("{} {}", Status::Fail.as_str(), msg),
            None => Status::Fail.as_str().to_string(),
        };
        Self { verb, body }
    }

    pub fn no_device(verb: Verb) -> Self {
        Self {
            verb,
            body: Status::NoDevice.as_str().to_string(),
        }
    }

    pub fn unknown(verb: Verb) -> Self {
        Self {
            verb,
            body: Status::Unknown.as_str().to_string(),
        }
    }

    pub fn device(reply: &DeviceReply) -> Self {
        Self {
            verb: Verb::Device,
            body: sanitize(&reply.to_string()),
        }
    }

    /// Result token, if the body starts with one.
    pub fn status(&self) -> Option<Status> {
        self.body.split_whitespace().next().and_then(Status::parse)
    }

    /// Body text after the result token.
    pub fn data(&self) -> Option<&str> {
        let rest = self
            .body
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim())?;
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Line text without the trailing newline.
    pub fn to_line(&self) -> String {
        if self.body.is_empty() {
            self.verb.to_string()
        } else {
            format!("{} {}", self.verb, self.body)
        }
    }
}

/// Keep free text on one line.
fn sanitize(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Failure classes shared by the control server and client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Malformed or unexpected control line.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The command needs a device and none is bound.
    #[error("no device bound")]
    DeviceAbsent,
    /// Hint resolution, construction or open failed.
    #[error("device creation failed: {0}")]
    DeviceCreation(String),
    /// The bound device rejected a request.
    #[error("operation failed: {0}")]
    Operation(String),
    /// Socket error on the control or sample channel.
    #[error("transport fault: {0}")]
    Transport(String),
    /// The session was closed locally.
    #[error("session closed")]
    Shutdown,
}

pub type LinkResult<T> = Result<T, LinkError>;

impl LinkError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        LinkError::Protocol(msg.into())
    }

    pub fn device_creation(msg: impl Into<String>) -> Self {
        LinkError::DeviceCreation(msg.into())
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        LinkError::Operation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        LinkError::Transport(msg.into())
    }

    /// Errors that tear the control connection down and may be retried by
    /// reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::Transport(_) | LinkError::Protocol(_) | LinkError::DeviceCreation(_)
        )
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LinkError::transport("reset").is_transient());
        assert!(LinkError::protocol("garbage").is_transient());
        assert!(LinkError::device_creation("no such backend").is_transient());
        assert!(!LinkError::operation("bad gain").is_transient());
        assert!(!LinkError::DeviceAbsent.is_transient());
        assert!(!LinkError::Shutdown.is_transient());
    }

    #[test]
    fn io_errors_become_transport_faults() {
        let err: LinkError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer").into();
        assert!(matches!(err, LinkError::Transport(_)));
    }
}

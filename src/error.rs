// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `camtest_lib` library.
//!
//! This module provides the error hierarchy used across the library: device
//! session failures (connect, authenticate, dispatch), status stream
//! failures, and configuration loading.
//!
//! Most public operations in this crate deliberately do *not* return these
//! errors: [`DeviceSession::connect`](crate::session::DeviceSession::connect)
//! reports a boolean and records the failure as the session's last error, and
//! command execution always yields a [`CommandOutput`](crate::session::CommandOutput).
//! The typed errors are still available through the `try_*` variants and the
//! session status snapshot.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by a device session.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error raised by the status stream listener.
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Error raised while loading configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Device was not found in the registry.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A logical test name could not be parsed.
    #[error(transparent)]
    UnknownTest(#[from] UnknownTest),
}

/// Failures of a single device session.
///
/// The variants follow the retry policy of the connect loop: see
/// [`SessionError::is_retryable`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The reachability probe failed. Never retried.
    #[error("device not responding at {host} (probe failed)")]
    Unreachable {
        /// The probed host.
        host: String,
    },

    /// The device actively refused the connection. Never retried.
    #[error("connection refused by {host}:{port}")]
    ConnectionRefused {
        /// The device host.
        host: String,
        /// The device port.
        port: u16,
    },

    /// A network operation did not complete in time.
    #[error("{operation} timed out after {} ms", after.as_millis())]
    Timeout {
        /// The operation that timed out (`connect`, `authenticate`, ...).
        operation: &'static str,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The login exchange reported a failure.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Any other socket-level failure.
    #[error("network error: {0}")]
    TransientIo(#[from] io::Error),

    /// A command could not be written or its output could not be read.
    #[error("command execution error: {0}")]
    CommandDispatch(String),

    /// The session has no open transport.
    #[error("session is not connected")]
    NotConnected,
}

impl SessionError {
    /// Returns true if the connect loop should try again after this error.
    ///
    /// Unreachable hosts and refused connections abort the loop immediately;
    /// retrying against a dead host or a closed port is not useful.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::AuthenticationFailed(_) | Self::TransientIo(_)
        )
    }

    /// Classifies an I/O error from opening the transport.
    pub(crate) fn from_connect_io(err: io::Error, host: &str, port: u16) -> Self {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            Self::ConnectionRefused {
                host: host.to_string(),
                port,
            }
        } else {
            Self::TransientIo(err)
        }
    }
}

/// Failures of the status stream listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener has no open connection.
    #[error("status stream is not connected")]
    NotConnected,

    /// Opening the connection did not complete in time.
    #[error("connection to {addr} timed out after {} ms", after.as_millis())]
    ConnectTimeout {
        /// The `host:port` target.
        addr: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Socket-level failure.
    #[error("status stream I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration source could not be read or extracted.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value was syntactically valid but unusable.
    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// A logical test name that the catalog does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown test: {0}")]
pub struct UnknownTest(pub String);

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_is_not_retryable() {
        let err = SessionError::Unreachable {
            host: "10.0.0.9".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "device not responding at 10.0.0.9 (probe failed)"
        );
    }

    #[test]
    fn refused_is_not_retryable() {
        let err = SessionError::from_connect_io(
            io::Error::from(io::ErrorKind::ConnectionRefused),
            "10.0.0.9",
            23,
        );
        assert!(matches!(err, SessionError::ConnectionRefused { port: 23, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = SessionError::from_connect_io(
            io::Error::from(io::ErrorKind::ConnectionReset),
            "10.0.0.9",
            23,
        );
        assert!(matches!(err, SessionError::TransientIo(_)));
        assert!(err.is_retryable());

        let timeout = SessionError::Timeout {
            operation: "connect",
            after: Duration::from_secs(10),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "connect timed out after 10000 ms");

        assert!(SessionError::AuthenticationFailed("denied".into()).is_retryable());
    }

    #[test]
    fn error_from_session_error() {
        let err: Error = SessionError::NotConnected.into();
        assert!(matches!(err, Error::Session(SessionError::NotConnected)));
        assert_eq!(err.to_string(), "session error: session is not connected");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "max_connections",
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration value for max_connections: must be at least 1"
        );
    }
}

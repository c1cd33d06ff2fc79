// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device and fixture event types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a registry lifecycle event.
///
/// Each kind has its own callback list in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A session finished connecting and authenticating.
    Connect,
    /// A session was removed or shut down.
    Disconnect,
    /// A connection attempt failed.
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Disconnect => f.write_str("disconnect"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Lifecycle events emitted by the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// The device is connected and ready for commands.
    Connected {
        /// Serial of the device.
        serial: String,
    },

    /// The device session was closed.
    Disconnected {
        /// Serial of the device.
        serial: String,
    },

    /// Connecting to the device failed.
    Error {
        /// Serial of the device.
        serial: String,
        /// The session's last error message.
        message: String,
    },
}

impl DeviceEvent {
    /// Creates a connected event.
    #[must_use]
    pub fn connected(serial: impl Into<String>) -> Self {
        Self::Connected {
            serial: serial.into(),
        }
    }

    /// Creates a disconnected event.
    #[must_use]
    pub fn disconnected(serial: impl Into<String>) -> Self {
        Self::Disconnected {
            serial: serial.into(),
        }
    }

    /// Creates an error event.
    #[must_use]
    pub fn error(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            serial: serial.into(),
            message: message.into(),
        }
    }

    /// Returns the serial of the device this event concerns.
    #[must_use]
    pub fn serial(&self) -> &str {
        match self {
            Self::Connected { serial }
            | Self::Disconnected { serial }
            | Self::Error { serial, .. } => serial,
        }
    }

    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connect,
            Self::Disconnected { .. } => EventKind::Disconnect,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// A ready message received on the fixture status stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySignal {
    /// The received text, trimmed.
    pub message: String,
    /// When the message was detected.
    pub timestamp: DateTime<Utc>,
}

impl ReadySignal {
    /// Creates a signal stamped with the current time.
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Point-in-time view of a session.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SessionState;

/// Snapshot of a session's identity, state and telemetry.
///
/// Returned by [`DeviceSession::status`](super::DeviceSession::status) and
/// by the registry's status queries. Serializes to JSON for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Device serial.
    pub serial: String,
    /// Device host.
    pub host: String,
    /// Device port.
    pub port: u16,
    /// Lifecycle state.
    pub state: SessionState,
    /// Whether commands may be issued.
    pub connected: bool,
    /// Last successful connect or command.
    pub last_activity: DateTime<Utc>,
    /// Consecutive failures.
    pub error_count: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_for_ui() {
        let status = SessionStatus {
            serial: "CAM001".to_string(),
            host: "192.168.1.20".to_string(),
            port: 23,
            state: SessionState::Ready,
            connected: true,
            last_activity: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            error_count: 0,
            last_error: None,
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["serial"], "CAM001");
        assert_eq!(json["state"], "ready");
        assert_eq!(json["connected"], true);
        assert_eq!(json["last_activity"], "2024-05-01T10:00:00Z");
        assert!(json["last_error"].is_null());
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session lifecycle states.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a [`DeviceSession`](super::DeviceSession).
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Authenticating -> Ready
/// ```
///
/// Any step may fall into `Error`. `disconnect` is valid from every state and
/// always ends in `Disconnected`.
///
/// # Examples
///
/// ```
/// use camtest_lib::session::SessionState;
///
/// assert!(SessionState::Ready.is_usable());
/// assert!(SessionState::Connected.is_usable());
/// assert!(!SessionState::Authenticating.is_usable());
/// assert_eq!(SessionState::Ready.as_str(), "ready");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// The probe or socket open is in progress.
    Connecting,
    /// The socket is open but the login exchange has not started.
    Connected,
    /// The login exchange is in progress.
    Authenticating,
    /// Logged in and accepting commands.
    Ready,
    /// The last connect attempt or command failed fatally.
    Error,
}

impl SessionState {
    /// Returns the lowercase name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Returns true for the states in which commands may be issued.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

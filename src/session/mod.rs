// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device shell sessions.
//!
//! A [`DeviceSession`] owns one Telnet connection to one camera and drives
//! it through connect, login, command execution and disconnect.
//!
//! # Failure policy
//!
//! - [`DeviceSession::connect`] returns a boolean; the reason for a failure
//!   is kept as the session's last error ([`DeviceSession::try_connect`]
//!   returns it as a [`SessionError`](crate::error::SessionError)).
//! - [`DeviceSession::execute_command`] never fails. It returns a
//!   [`CommandOutput`] whose [`CommandOutcome`] tells a completed round trip
//!   from a read timeout (still a success) and from a wire failure.
//!
//! # Login
//!
//! See [`auth`] for the login heuristic and why the password is never sent.

pub mod auth;
mod connection;
mod device_session;
mod output;
mod probe;
mod state;
mod status;
mod telnet;

use std::time::Duration;

pub use device_session::DeviceSession;
pub use output::{CommandOutcome, CommandOutput};
pub use probe::{AlwaysReachable, PingProbe, ProbeFuture, ReachabilityProbe};
pub use state::SessionState;
pub use status::SessionStatus;

/// Something that can run a shell command on one device.
///
/// [`CommandCatalog`](crate::catalog::CommandCatalog) drives logical tests
/// through this trait, so tests can substitute a recorder for a live
/// session.
#[allow(async_fn_in_trait)]
pub trait CommandExecutor {
    /// Returns the serial of the device commands go to.
    fn serial(&self) -> &str;

    /// Runs `command`, waiting at most `timeout` for the prompt.
    async fn run_command(&self, command: &str, timeout: Duration) -> CommandOutput;
}

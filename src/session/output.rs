// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Result of a single command round trip.

use serde::Serialize;

/// How a command round trip ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The prompt was seen; output is complete.
    Completed,
    /// The command was written but the prompt did not arrive before the
    /// deadline. Shell commands that print nothing end here.
    TimedOut,
    /// Writing the command or reading its output failed.
    Failed(String),
    /// The session had no open transport; nothing was sent.
    NotConnected,
    /// The session was disconnected while the command was in flight.
    Cancelled,
}

/// Output of [`DeviceSession::execute_command`](super::DeviceSession::execute_command).
///
/// Execution never returns an error. A read timeout counts as success with
/// whatever was captured (usually nothing); any other failure yields empty
/// output and a [`CommandOutcome`] describing what went wrong.
///
/// # Examples
///
/// ```
/// use camtest_lib::session::CommandOutput;
///
/// let out = CommandOutput::timed_out();
/// assert!(out.succeeded());
/// assert!(out.timed_out_waiting());
/// assert_eq!(out.output(), "");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    output: String,
    #[serde(flatten)]
    outcome: CommandOutcome,
}

impl CommandOutput {
    /// A completed round trip with its cleaned output.
    #[must_use]
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            outcome: CommandOutcome::Completed,
        }
    }

    /// A round trip whose read deadline elapsed.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            output: String::new(),
            outcome: CommandOutcome::TimedOut,
        }
    }

    /// A round trip that failed on the wire.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            outcome: CommandOutcome::Failed(reason.into()),
        }
    }

    /// A command refused because the session was not usable.
    #[must_use]
    pub fn not_connected() -> Self {
        Self {
            output: String::new(),
            outcome: CommandOutcome::NotConnected,
        }
    }

    /// A command abandoned by a concurrent disconnect.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            output: String::new(),
            outcome: CommandOutcome::Cancelled,
        }
    }

    /// Returns the captured output, possibly empty.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Consumes the result and returns the captured output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.output
    }

    /// Returns how the round trip ended.
    #[must_use]
    pub fn outcome(&self) -> &CommandOutcome {
        &self.outcome
    }

    /// Returns true if the command reached the device.
    ///
    /// Both a completed round trip and a read timeout count.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            CommandOutcome::Completed | CommandOutcome::TimedOut
        )
    }

    /// Returns true if the prompt never arrived before the deadline.
    #[must_use]
    pub fn timed_out_waiting(&self) -> bool {
        self.outcome == CommandOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_carry_empty_output() {
        for out in [
            CommandOutput::failed("broken pipe"),
            CommandOutput::not_connected(),
            CommandOutput::cancelled(),
        ] {
            assert!(!out.succeeded());
            assert!(out.output().is_empty());
        }
    }

    #[test]
    fn completed_keeps_output() {
        let out = CommandOutput::completed("Linux cam 5.10");
        assert!(out.succeeded());
        assert!(!out.timed_out_waiting());
        assert_eq!(out.into_output(), "Linux cam 5.10");
    }

    #[test]
    fn serializes_flat() {
        let json = serde_json::to_value(CommandOutput::failed("reset")).unwrap();
        assert_eq!(json["output"], "");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "reset");
    }
}

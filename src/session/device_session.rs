// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single device shell session.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::SessionError;

use super::auth;
use super::connection::Connection;
use super::probe::{PingProbe, ReachabilityProbe};
use super::{CommandExecutor, CommandOutput, SessionState, SessionStatus};

/// Mutable bookkeeping shared by the state machine and status queries.
#[derive(Debug)]
struct Telemetry {
    state: SessionState,
    last_activity: DateTime<Utc>,
    error_count: u32,
    last_error: Option<String>,
}

/// A session to one camera's remote shell.
///
/// The session drives the connect, authenticate, execute and disconnect
/// state machine described on [`SessionState`]. All commands on one session
/// are serialized: the transport lives behind an async mutex that is held for
/// the whole write/read round trip, so output from two callers is never
/// interleaved. Different sessions share nothing and run fully in parallel.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use camtest_lib::config::SessionConfig;
/// use camtest_lib::session::DeviceSession;
///
/// # async fn example() {
/// let session = DeviceSession::new("CAM001", "192.168.1.20", SessionConfig::default());
///
/// if session.connect().await {
///     let out = session.execute_command("uname -a", Duration::from_secs(5), "#").await;
///     println!("{}", out.output());
///     session.disconnect().await;
/// } else {
///     println!("connect failed: {:?}", session.last_error());
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceSession {
    serial: String,
    host: String,
    config: SessionConfig,
    probe: Arc<dyn ReachabilityProbe>,
    // Exclusive-execution guard: held for every round trip
    connection: tokio::sync::Mutex<Option<Connection>>,
    telemetry: parking_lot::Mutex<Telemetry>,
    cancel: parking_lot::Mutex<CancellationToken>,
    connect_attempts: AtomicU32,
}

impl DeviceSession {
    /// Creates a disconnected session that probes with `ping`.
    pub fn new(serial: impl Into<String>, host: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            serial: serial.into(),
            host: host.into(),
            config,
            probe: Arc::new(PingProbe),
            connection: tokio::sync::Mutex::new(None),
            telemetry: parking_lot::Mutex::new(Telemetry {
                state: SessionState::Disconnected,
                last_activity: Utc::now(),
                error_count: 0,
                last_error: None,
            }),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            connect_attempts: AtomicU32::new(0),
        }
    }

    /// Replaces the reachability probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = probe;
        self
    }

    // ========================================================================
    // Identity and telemetry
    // ========================================================================

    /// Returns the device serial.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the device host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the device port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.telemetry.lock().state
    }

    /// Returns true if commands may be issued.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_usable()
    }

    /// Returns the time of the last successful connect or command.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.telemetry.lock().last_activity
    }

    /// Returns the number of consecutive failures.
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.telemetry.lock().error_count
    }

    /// Returns the message of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.telemetry.lock().last_error.clone()
    }

    /// Returns how many attempts the most recent connect made.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of identity, state and telemetry.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let telemetry = self.telemetry.lock();
        SessionStatus {
            serial: self.serial.clone(),
            host: self.host.clone(),
            port: self.config.port,
            state: telemetry.state,
            connected: telemetry.state.is_usable(),
            last_activity: telemetry.last_activity,
            error_count: telemetry.error_count,
            last_error: telemetry.last_error.clone(),
        }
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Connects and logs in, retrying with exponential backoff.
    ///
    /// Returns `true` once the session is `Ready`. On failure the session is
    /// left in `Error`, its error count is incremented and the reason is
    /// available from [`last_error`](Self::last_error).
    pub async fn connect(&self) -> bool {
        self.try_connect().await.is_ok()
    }

    /// Like [`connect`](Self::connect), but returns the final error.
    ///
    /// The reachability probe runs before the first attempt only. An
    /// unreachable host or a refused connection ends the loop at once;
    /// timeouts, I/O errors and rejected logins are retried up to
    /// `max_retries` attempts.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn try_connect(&self) -> Result<(), SessionError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0;
        let mut last_err = SessionError::NotConnected;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            self.set_state(SessionState::Connecting);

            if attempt == 1 {
                if !self
                    .probe
                    .is_reachable(&self.host, self.config.probe_timeout)
                    .await
                {
                    last_err = SessionError::Unreachable {
                        host: self.host.clone(),
                    };
                    tracing::warn!(serial = %self.serial, host = %self.host, "Device not responding to probe");
                    break;
                }
            } else {
                let delay = self.config.backoff_delay(attempt);
                tracing::info!(
                    serial = %self.serial,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying connection"
                );
                tokio::time::sleep(delay).await;
            }

            match self.open_and_login().await {
                Ok(()) => {
                    self.connect_attempts.store(attempt, Ordering::Relaxed);
                    let mut telemetry = self.telemetry.lock();
                    telemetry.state = SessionState::Ready;
                    telemetry.error_count = 0;
                    telemetry.last_activity = Utc::now();
                    drop(telemetry);
                    tracing::info!(serial = %self.serial, host = %self.host, attempt, "Device session ready");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(serial = %self.serial, attempt, error = %e, "Connect attempt failed");
                    self.telemetry.lock().last_error = Some(e.to_string());
                    let retry = e.is_retryable();
                    last_err = e;
                    if !retry {
                        break;
                    }
                }
            }
        }

        self.connect_attempts.store(attempts, Ordering::Relaxed);
        let mut telemetry = self.telemetry.lock();
        telemetry.state = SessionState::Error;
        telemetry.error_count += 1;
        telemetry.last_error = Some(last_err.to_string());
        drop(telemetry);

        tracing::error!(serial = %self.serial, attempts, error = %last_err, "Failed to connect");
        Err(last_err)
    }

    async fn open_and_login(&self) -> Result<(), SessionError> {
        let mut conn =
            Connection::open(&self.host, self.config.port, self.config.connect_timeout).await?;
        self.set_state(SessionState::Connected);
        tracing::debug!(serial = %self.serial, host = %self.host, port = self.config.port, "Socket open");

        self.set_state(SessionState::Authenticating);
        if let Err(e) = auth::authenticate(&mut conn, &self.config).await {
            // Drop the half-logged-in transport before the next attempt
            let _ = tokio::time::timeout(self.config.exit_drain_timeout, conn.shutdown()).await;
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        let mut slot = self.connection.lock().await;
        if let Some(mut stale) = slot.replace(conn) {
            let _ = tokio::time::timeout(self.config.exit_drain_timeout, stale.shutdown()).await;
        }
        Ok(())
    }

    // ========================================================================
    // Execute
    // ========================================================================

    /// Runs a command with the configured timeout and prompt.
    pub async fn execute(&self, command: &str) -> CommandOutput {
        self.execute_command(command, self.config.command_timeout, &self.config.prompt)
            .await
    }

    /// Writes `command` and reads until `expect_prompt` or `timeout`.
    ///
    /// Never fails. A read timeout is a success with whatever output was
    /// seen, which is usually nothing. Any other failure increments the
    /// error count, records the message and returns empty output. A
    /// concurrent [`disconnect`](Self::disconnect) abandons the command.
    ///
    /// The leading echo of the command and the trailing prompt are stripped
    /// from the captured text.
    pub async fn execute_command(
        &self,
        command: &str,
        timeout: Duration,
        expect_prompt: &str,
    ) -> CommandOutput {
        if !self.is_connected() {
            tracing::warn!(serial = %self.serial, command, "Command refused, session not connected");
            return CommandOutput::not_connected();
        }

        let cancel = self.cancel.lock().clone();
        let mut slot = tokio::select! {
            biased;
            () = cancel.cancelled() => return CommandOutput::cancelled(),
            slot = self.connection.lock() => slot,
        };
        let Some(conn) = slot.as_mut() else {
            return CommandOutput::not_connected();
        };

        tracing::debug!(serial = %self.serial, command, "Executing command");
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(serial = %self.serial, command, "Command cancelled by disconnect");
                return CommandOutput::cancelled();
            }
            result = round_trip(conn, command, self.config.command_settle, timeout, expect_prompt) => result,
        };

        match result {
            Ok(Some(raw)) => {
                self.record_success();
                let output = clean_output(&raw, command, expect_prompt);
                tracing::debug!(serial = %self.serial, command, bytes = output.len(), "Command completed");
                CommandOutput::completed(output)
            }
            Ok(None) => {
                self.record_success();
                tracing::debug!(
                    serial = %self.serial,
                    command,
                    timeout_ms = timeout.as_millis(),
                    "No prompt before deadline, treating as sent"
                );
                CommandOutput::timed_out()
            }
            Err(e) => {
                let lost = transport_lost(&e);
                let err = SessionError::CommandDispatch(e.to_string());
                tracing::error!(serial = %self.serial, command, error = %err, "Command failed");

                if lost {
                    // The peer is gone; let the health loop reconnect
                    if let Some(mut dead) = slot.take() {
                        let drain = self.config.exit_drain_timeout;
                        let _ = tokio::time::timeout(drain, dead.shutdown()).await;
                    }
                }
                let mut telemetry = self.telemetry.lock();
                telemetry.error_count += 1;
                telemetry.last_error = Some(err.to_string());
                if lost {
                    telemetry.state = SessionState::Error;
                }
                drop(telemetry);

                CommandOutput::failed(err.to_string())
            }
        }
    }

    /// Sends a harmless command to keep the shell alive.
    ///
    /// Failures are not reported here; they show up in the error count.
    pub async fn keep_alive(&self) {
        let out = self
            .execute_command("echo", self.config.keep_alive_timeout, &self.config.prompt)
            .await;
        if !out.succeeded() {
            tracing::debug!(serial = %self.serial, outcome = ?out.outcome(), "Keep-alive failed");
        }
    }

    // ========================================================================
    // Disconnect
    // ========================================================================

    /// Closes the session.
    ///
    /// Cancels any command in flight, sends `exit` with a short drain
    /// timeout and closes the transport whether or not `exit` went through.
    /// Always ends in `Disconnected`.
    pub async fn disconnect(&self) {
        {
            let mut cancel = self.cancel.lock();
            cancel.cancel();
            *cancel = CancellationToken::new();
        }

        let conn = self.connection.lock().await.take();
        if let Some(mut conn) = conn {
            match tokio::time::timeout(self.config.exit_drain_timeout, conn.write_line("exit")).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(serial = %self.serial, error = %e, "Exit command failed");
                }
                Err(_) => {
                    tracing::debug!(serial = %self.serial, "Exit command timed out");
                }
            }
            let _ = tokio::time::timeout(self.config.exit_drain_timeout, conn.shutdown()).await;
            tracing::info!(serial = %self.serial, "Disconnected from device");
        }

        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, state: SessionState) {
        let mut telemetry = self.telemetry.lock();
        if telemetry.state != state {
            tracing::trace!(serial = %self.serial, from = %telemetry.state, to = %state, "State change");
            telemetry.state = state;
        }
    }

    /// A round trip went through: the consecutive error count starts over.
    fn record_success(&self) {
        let mut telemetry = self.telemetry.lock();
        telemetry.last_activity = Utc::now();
        telemetry.error_count = 0;
    }
}

impl CommandExecutor for DeviceSession {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn run_command(&self, command: &str, timeout: Duration) -> CommandOutput {
        self.execute_command(command, timeout, &self.config.prompt)
            .await
    }
}

/// Writes a command and reads its output.
///
/// Returns `Ok(None)` if the prompt did not arrive within `read_timeout`.
async fn round_trip(
    conn: &mut Connection,
    command: &str,
    settle: Duration,
    read_timeout: Duration,
    prompt: &str,
) -> io::Result<Option<Vec<u8>>> {
    conn.discard_pending();
    tokio::time::timeout(read_timeout, conn.write_line(command))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))??;

    tokio::time::sleep(settle).await;

    match tokio::time::timeout(read_timeout, conn.read_until(prompt.as_bytes())).await {
        Ok(read) => read.map(Some),
        Err(_) => Ok(None),
    }
}

/// Returns true if `err` means the peer is gone and the transport is unusable.
fn transport_lost(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Strips the echoed command and the trailing prompt.
fn clean_output(raw: &[u8], command: &str, prompt: &str) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut text = text.trim();
    if !command.is_empty()
        && let Some(rest) = text.strip_prefix(command)
    {
        text = rest.trim();
    }
    if !prompt.is_empty()
        && let Some(rest) = text.strip_suffix(prompt)
    {
        text = rest.trim();
    }
    text.to_string()
}

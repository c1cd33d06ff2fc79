// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reachability probes run before the first connect attempt.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Boxed future returned by [`ReachabilityProbe::is_reachable`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Checks whether a host answers before a session tries to log in.
///
/// An unreachable host aborts the connect loop without retrying, so a probe
/// should only answer `false` when it is confident the host is down.
pub trait ReachabilityProbe: Send + Sync + fmt::Debug {
    /// Probes `host`, giving up after `timeout`.
    fn is_reachable<'a>(&'a self, host: &'a str, timeout: Duration) -> ProbeFuture<'a>;
}

/// Sends a single ICMP echo request using the system `ping` binary.
///
/// If `ping` is not installed the host is assumed reachable, so that a bare
/// container without `iputils` can still talk to devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingProbe;

impl PingProbe {
    fn command(host: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w", &timeout.as_millis().to_string(), host]);
        } else {
            let secs = timeout.as_secs().max(1);
            cmd.args(["-c", "1", "-W", &secs.to_string(), host]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl ReachabilityProbe for PingProbe {
    fn is_reachable<'a>(&'a self, host: &'a str, timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async move {
            let mut cmd = Self::command(host, timeout);
            // ping enforces its own deadline; the outer one covers a hung process
            let deadline = timeout + Duration::from_secs(1);

            match tokio::time::timeout(deadline, cmd.status()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(host, success = status.success(), "Ping finished");
                    status.success()
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(host, "ping binary not found, assuming host is reachable");
                    true
                }
                Ok(Err(e)) => {
                    tracing::error!(host, error = %e, "Failed to run ping");
                    false
                }
                Err(_) => {
                    tracing::warn!(host, timeout_ms = deadline.as_millis(), "Ping timed out");
                    false
                }
            }
        })
    }
}

/// A probe that never fails.
///
/// Useful for devices behind firewalls that drop ICMP, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl ReachabilityProbe for AlwaysReachable {
    fn is_reachable<'a>(&'a self, _host: &'a str, _timeout: Duration) -> ProbeFuture<'a> {
        Box::pin(async { true })
    }
}

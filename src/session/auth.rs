// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Login exchange with a device shell.
//!
//! The camera firmware answers any username with a shell prompt and performs
//! no password check, so the exchange is a heuristic: send the username once a
//! prompt shows up, then treat the login as successful unless the reply
//! contains one of [`FAILURE_KEYWORDS`]. The configured password is never
//! sent. A stricter check would reject devices that work today.

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::SessionError;

use super::connection::Connection;

/// Markers that mean the device is asking for a username.
pub const LOGIN_PROMPTS: &[&str] = &["login:", "username:", "user:"];

/// Words that mean the device rejected the login.
pub const FAILURE_KEYWORDS: &[&str] = &["incorrect", "failed", "denied", "invalid", "error"];

const BANNER_BYTES: usize = 2048;
const RESPONSE_BYTES: usize = 1024;

/// Runs the login exchange on a freshly opened connection.
pub(crate) async fn authenticate(
    conn: &mut Connection,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let banner = bounded(config.connect_timeout, conn.read_chunk(BANNER_BYTES)).await?;
    let banner = String::from_utf8_lossy(&banner).to_lowercase();
    tracing::trace!(banner = %preview(&banner), "Login banner");

    if !has_login_prompt(&banner) {
        bounded(config.connect_timeout, conn.read_until(b":")).await?;
    }

    bounded(config.connect_timeout, conn.write_line(&config.credentials.username)).await?;

    let response = bounded(config.auth_response_timeout, conn.read_chunk(RESPONSE_BYTES)).await?;
    let response = String::from_utf8_lossy(&response);
    tracing::trace!(response = %preview(&response), "Login response");

    match failure_keyword(&response) {
        Some(keyword) => Err(SessionError::AuthenticationFailed(format!(
            "device answered with \"{keyword}\""
        ))),
        None => Ok(()),
    }
}

/// Returns true if `text` contains a login prompt, ignoring case.
#[must_use]
pub fn has_login_prompt(text: &str) -> bool {
    let lower = text.to_lowercase();
    LOGIN_PROMPTS.iter().any(|prompt| lower.contains(prompt))
}

/// Returns the first failure keyword found in `text`, ignoring case.
#[must_use]
pub fn failure_keyword(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    FAILURE_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| lower.contains(keyword))
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, SessionError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SessionError::Timeout {
            operation: "authenticate",
            after: limit,
        })?
        .map_err(SessionError::from)
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

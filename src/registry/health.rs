// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic health sweep over registered sessions.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::event::DeviceEvent;
use crate::session::DeviceSession;

use super::device_registry::RegistryInner;

/// Runs sweeps every `interval` until `cancel` fires or the registry is
/// dropped.
///
/// The sweep itself races the token, so cancelling mid-sweep aborts the
/// in-flight checks instead of waiting for slow reconnects.
pub(super) async fn run(inner: Weak<RegistryInner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(registry) = inner.upgrade() else {
            break;
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sweep(&registry) => {}
        }
    }

    tracing::debug!("Health sweep exiting");
}

/// Checks every registered session concurrently.
///
/// Each check runs as its own task so that a panic in one is contained.
/// Dropping the sweep aborts every check still running.
async fn sweep(registry: &Arc<RegistryInner>) {
    let sessions: Vec<Arc<DeviceSession>> =
        registry.sessions.read().await.values().cloned().collect();
    if sessions.is_empty() {
        return;
    }

    tracing::debug!(devices = sessions.len(), "Health sweep");
    let mut checks = JoinSet::new();
    for session in sessions {
        checks.spawn_on(check(Arc::clone(registry), session), &registry.runtime);
    }

    while let Some(joined) = checks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Health check task failed");
        }
    }
}

async fn check(registry: Arc<RegistryInner>, session: Arc<DeviceSession>) {
    if session.is_connected() {
        session.keep_alive().await;

        let errors = session.error_count();
        if errors > registry.config.error_threshold {
            tracing::warn!(
                serial = %session.serial(),
                errors,
                threshold = registry.config.error_threshold,
                "Too many errors, reconnecting"
            );
            session.disconnect().await;
            reconnect(&registry, &session).await;
        }
    } else {
        tracing::info!(serial = %session.serial(), state = %session.state(), "Reconnecting");
        reconnect(&registry, &session).await;
    }
}

async fn reconnect(registry: &RegistryInner, session: &DeviceSession) {
    let Ok(_permit) = registry.connect_slots.acquire().await else {
        return;
    };

    let connected = session.connect().await;
    let serial = session.serial().to_string();

    // The device may have been removed while we were reconnecting
    if !registry.sessions.read().await.contains_key(&serial) {
        if connected {
            session.disconnect().await;
        }
        return;
    }

    let event = if connected {
        DeviceEvent::connected(serial)
    } else {
        let message = session
            .last_error()
            .unwrap_or_else(|| "reconnect failed".to_string());
        DeviceEvent::error(serial, message)
    };
    registry.emit(event).await;
}

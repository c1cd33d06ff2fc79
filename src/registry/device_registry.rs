// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registry for coordinating many camera sessions.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{RwLock, Semaphore, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::catalog::{CommandCatalog, LogicalTest, TestOutcome};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::event::{DeviceEvent, EventBus, EventKind};
use crate::session::{CommandOutput, DeviceSession, PingProbe, ReachabilityProbe, SessionStatus};
use crate::subscription::{CallbackList, CallbackResult, SubscriptionId};

/// Handle to the running health sweep.
#[derive(Debug)]
pub(super) struct HealthTask {
    pub(super) handle: JoinHandle<()>,
    pub(super) cancel: CancellationToken,
}

/// State shared between the registry handle and its background tasks.
#[derive(Debug)]
pub(super) struct RegistryInner {
    pub(super) config: RegistryConfig,
    pub(super) runtime: Handle,
    probe: Arc<dyn ReachabilityProbe>,
    pub(super) sessions: RwLock<HashMap<String, Arc<DeviceSession>>>,
    /// Serials whose first connect is in flight.
    pending: parking_lot::Mutex<HashSet<String>>,
    pub(super) connect_slots: Semaphore,
    on_connect: CallbackList<DeviceEvent>,
    on_disconnect: CallbackList<DeviceEvent>,
    on_error: CallbackList<DeviceEvent>,
    event_bus: EventBus<DeviceEvent>,
    health: parking_lot::Mutex<Option<HealthTask>>,
}

impl RegistryInner {
    fn callbacks(&self, kind: EventKind) -> &CallbackList<DeviceEvent> {
        match kind {
            EventKind::Connect => &self.on_connect,
            EventKind::Disconnect => &self.on_disconnect,
            EventKind::Error => &self.on_error,
        }
    }

    /// Runs the callbacks for `event`, then broadcasts it.
    pub(super) async fn emit(&self, event: DeviceEvent) {
        self.callbacks(event.kind()).dispatch(&event).await;
        self.event_bus.publish(event);
    }

    fn take_health(&self) -> Option<HealthTask> {
        self.health.lock().take()
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Some(task) = self.health.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

/// Removes a serial from the in-flight set when dropped.
///
/// Keeps the set accurate even if an `add_device` future is cancelled.
struct Reservation<'a> {
    pending: &'a parking_lot::Mutex<HashSet<String>>,
    serial: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.serial);
    }
}

/// Registry of camera sessions.
///
/// The registry maps each serial to at most one [`DeviceSession`]. It is
/// cheap to clone; clones share the same sessions and callbacks.
///
/// # Limits
///
/// `max_connections` bounds both the number of connects in flight (a
/// semaphore) and the number of registered sessions plus connects in flight
/// (checked before a new session is created).
///
/// # Runtime
///
/// Background work (the health sweep and fan-out tasks) is spawned on the
/// [`Handle`] passed at construction, not on whatever runtime happens to be
/// current when a method is called.
///
/// # Examples
///
/// ```no_run
/// use camtest_lib::config::RegistryConfig;
/// use camtest_lib::registry::DeviceRegistry;
///
/// # async fn example() {
/// let registry = DeviceRegistry::new(RegistryConfig::default(), tokio::runtime::Handle::current());
///
/// registry.on_error(|event| {
///     println!("{event:?}");
///     Ok(())
/// });
///
/// if registry.add_device("CAM001", "192.168.1.20").await {
///     let results = registry.execute_on_all("uptime").await;
///     for (serial, out) in results {
///         println!("{serial}: {}", out.output());
///     }
/// }
///
/// registry.close_all().await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    /// Creates an empty registry that probes devices with `ping`.
    #[must_use]
    pub fn new(config: RegistryConfig, runtime: Handle) -> Self {
        Self::with_probe(config, runtime, Arc::new(PingProbe))
    }

    /// Creates an empty registry with a custom reachability probe.
    #[must_use]
    pub fn with_probe(
        config: RegistryConfig,
        runtime: Handle,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let slots = config.max_connections.max(1);
        Self {
            inner: Arc::new(RegistryInner {
                config,
                runtime,
                probe,
                sessions: RwLock::new(HashMap::new()),
                pending: parking_lot::Mutex::new(HashSet::new()),
                connect_slots: Semaphore::new(slots),
                on_connect: CallbackList::new("connect"),
                on_disconnect: CallbackList::new("disconnect"),
                on_error: CallbackList::new("error"),
                event_bus: EventBus::new(),
                health: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Returns the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    // =========================================================================
    // Device Management
    // =========================================================================

    /// Connects to a device and registers its session.
    ///
    /// Waits for a connect slot first. If `serial` is already registered,
    /// returns its current connectivity without opening a second session.
    /// If a connect for `serial` is already in flight, or the registry is
    /// full, returns `false`.
    ///
    /// On success the session is registered, `connect` fires, and the
    /// health sweep starts if this is the first session. On failure `error`
    /// fires with the session's last error and nothing is registered.
    pub async fn add_device(&self, serial: impl Into<String>, host: impl Into<String>) -> bool {
        let serial = serial.into();
        let host = host.into();
        let inner = &self.inner;

        let Ok(_permit) = inner.connect_slots.acquire().await else {
            return false;
        };

        let reservation = {
            let sessions = inner.sessions.read().await;
            if let Some(existing) = sessions.get(&serial) {
                tracing::debug!(serial = %serial, "Device already registered");
                return existing.is_connected();
            }

            let mut pending = inner.pending.lock();
            if pending.contains(&serial) {
                tracing::debug!(serial = %serial, "Connect already in flight");
                return false;
            }
            let in_use = sessions.len() + pending.len();
            if in_use >= inner.config.max_connections {
                tracing::warn!(
                    serial = %serial,
                    max_connections = inner.config.max_connections,
                    "Registry full, refusing device"
                );
                return false;
            }
            pending.insert(serial.clone());
            Reservation {
                pending: &inner.pending,
                serial: serial.clone(),
            }
        };

        tracing::info!(serial = %serial, host = %host, "Adding device");
        let session = Arc::new(
            DeviceSession::new(serial.clone(), host, inner.config.session.clone())
                .with_probe(Arc::clone(&inner.probe)),
        );

        if !session.connect().await {
            drop(reservation);
            let message = session
                .last_error()
                .unwrap_or_else(|| "connection failed".to_string());
            inner.emit(DeviceEvent::error(serial, message)).await;
            return false;
        }

        {
            // Start and stop decisions for the sweep are made under the map lock
            let mut sessions = inner.sessions.write().await;
            sessions.insert(serial.clone(), session);
            drop(reservation);
            if sessions.len() == 1 {
                self.start_health();
            }
        }
        inner.emit(DeviceEvent::connected(serial)).await;
        true
    }

    /// Disconnects and unregisters a device.
    ///
    /// Fires `disconnect` and stops the health sweep if the registry is now
    /// empty. Returns `false` if the serial was not registered.
    pub async fn remove_device(&self, serial: &str) -> bool {
        let (session, health) = {
            let mut sessions = self.inner.sessions.write().await;
            let session = sessions.remove(serial);
            let health = if session.is_some() && sessions.is_empty() {
                self.inner.take_health()
            } else {
                None
            };
            (session, health)
        };

        let Some(session) = session else {
            return false;
        };

        stop_health(health).await;
        session.disconnect().await;
        tracing::info!(serial, "Device removed");
        self.inner
            .emit(DeviceEvent::disconnected(serial.to_string()))
            .await;
        true
    }

    /// Returns the session registered for `serial`.
    pub async fn session(&self, serial: &str) -> Option<Arc<DeviceSession>> {
        self.inner.sessions.read().await.get(serial).cloned()
    }

    /// Returns true if `serial` is registered.
    pub async fn contains(&self, serial: &str) -> bool {
        self.inner.sessions.read().await.contains_key(serial)
    }

    /// Returns the registered serials.
    pub async fn serials(&self) -> Vec<String> {
        self.inner.sessions.read().await.keys().cloned().collect()
    }

    /// Returns the number of registered sessions.
    pub async fn device_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Returns a status snapshot for `serial`.
    pub async fn session_status(&self, serial: &str) -> Option<SessionStatus> {
        self.inner
            .sessions
            .read()
            .await
            .get(serial)
            .map(|session| session.status())
    }

    /// Returns status snapshots for every registered session.
    pub async fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|session| session.status())
            .collect();
        statuses.sort_by(|a, b| a.serial.cmp(&b.serial));
        statuses
    }

    // =========================================================================
    // Command Execution
    // =========================================================================

    /// Runs a command on one device.
    ///
    /// Returns `None` if the serial is not registered.
    pub async fn execute_on(&self, serial: &str, command: &str) -> Option<CommandOutput> {
        let Some(session) = self.session(serial).await else {
            tracing::error!(serial, "Device not in registry");
            return None;
        };
        Some(session.execute(command).await)
    }

    /// Runs a command on every connected device at once.
    ///
    /// Each device gets its own task, so a slow or failing device never holds
    /// up the others. A task that panics yields a failed output for its
    /// device. Devices that are registered but not connected are skipped.
    pub async fn execute_on_all(&self, command: &str) -> HashMap<String, CommandOutput> {
        let targets: Vec<(String, Arc<DeviceSession>)> = self
            .inner
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.is_connected())
            .map(|(serial, session)| (serial.clone(), Arc::clone(session)))
            .collect();

        if targets.is_empty() {
            tracing::warn!(command, "No connected devices to run command on");
            return HashMap::new();
        }

        tracing::info!(command, devices = targets.len(), "Running command on all devices");
        let tasks: Vec<(String, JoinHandle<CommandOutput>)> = targets
            .into_iter()
            .map(|(serial, session)| {
                let command = command.to_string();
                let handle = self
                    .inner
                    .runtime
                    .spawn(async move { session.execute(&command).await });
                (serial, handle)
            })
            .collect();

        let mut results = HashMap::with_capacity(tasks.len());
        for (serial, handle) in tasks {
            let output = match handle.await {
                Ok(output) => output,
                Err(e) => {
                    tracing::error!(serial = %serial, error = %e, "Command task failed");
                    CommandOutput::failed(e.to_string())
                }
            };
            results.insert(serial, output);
        }
        results
    }

    /// Runs a logical test on one device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the serial is not registered.
    pub async fn run_test(
        &self,
        serial: &str,
        catalog: &CommandCatalog,
        test: LogicalTest,
    ) -> Result<TestOutcome> {
        let session = self
            .session(serial)
            .await
            .ok_or_else(|| Error::DeviceNotFound(serial.to_string()))?;
        Ok(catalog.run(session.as_ref(), test).await)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops the health sweep, disconnects every session and empties the
    /// registry.
    ///
    /// Sessions are disconnected concurrently and `disconnect` fires for
    /// each. Safe to call repeatedly and with no sessions; devices may be
    /// added again afterwards.
    pub async fn close_all(&self) {
        let (sessions, health) = {
            let mut map = self.inner.sessions.write().await;
            let sessions: Vec<Arc<DeviceSession>> =
                map.drain().map(|(_, session)| session).collect();
            (sessions, self.inner.take_health())
        };
        stop_health(health).await;

        if sessions.is_empty() {
            return;
        }

        tracing::info!(count = sessions.len(), "Closing all device sessions");
        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn_on(
                async move {
                    session.disconnect().await;
                    session.serial().to_string()
                },
                &self.inner.runtime,
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(serial) => self.inner.emit(DeviceEvent::disconnected(serial)).await,
                Err(e) => tracing::error!(error = %e, "Disconnect task failed"),
            }
        }
        tracing::info!("All device sessions closed");
    }

    /// Returns true while the health sweep is scheduled.
    #[must_use]
    pub fn is_health_check_running(&self) -> bool {
        self.inner
            .health
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    fn start_health(&self) {
        let mut health = self.inner.health.lock();
        if health.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = self.inner.runtime.spawn(super::health::run(
            Arc::downgrade(&self.inner),
            self.inner.config.health_check_interval,
            cancel.clone(),
        ));
        *health = Some(HealthTask { handle, cancel });
        tracing::debug!("Health sweep started");
    }


    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to lifecycle events on a broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.event_bus.subscribe()
    }

    /// Registers a handler for successful connects.
    pub fn on_connect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.on_connect.subscribe(callback)
    }

    /// Registers an awaited handler for successful connects.
    pub fn on_connect_async<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.on_connect.subscribe_async(callback)
    }

    /// Registers a handler for disconnects.
    pub fn on_disconnect<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.on_disconnect.subscribe(callback)
    }

    /// Registers an awaited handler for disconnects.
    pub fn on_disconnect_async<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.on_disconnect.subscribe_async(callback)
    }

    /// Registers a handler for connect failures.
    pub fn on_error<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeviceEvent) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.on_error.subscribe(callback)
    }

    /// Registers an awaited handler for connect failures.
    pub fn on_error_async<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(DeviceEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.on_error.subscribe_async(callback)
    }

    /// Removes a handler registered with any of the `on_*` methods.
    ///
    /// Returns `true` if a handler was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        [EventKind::Connect, EventKind::Disconnect, EventKind::Error]
            .into_iter()
            .any(|kind| self.inner.callbacks(kind).unsubscribe(id))
    }

    /// Returns the number of handlers registered for `kind`.
    #[must_use]
    pub fn callback_count(&self, kind: EventKind) -> usize {
        self.inner.callbacks(kind).len()
    }
}

/// Cancels a health sweep taken out of the registry and waits for it.
async fn stop_health(task: Option<HealthTask>) {
    let Some(task) = task else {
        return;
    };
    task.cancel.cancel();
    if let Err(e) = task.handle.await
        && !e.is_cancelled()
    {
        tracing::error!(error = %e, "Health sweep ended abnormally");
    }
    tracing::debug!("Health sweep stopped");
}

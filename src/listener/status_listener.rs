// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnecting client for the fixture's status stream.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::event::{EventBus, ReadySignal};
use crate::subscription::{CallbackList, CallbackResult, SubscriptionId};

use super::ReadyDetector;

/// Size of a single socket read.
const READ_CHUNK: usize = 1024;

/// Background work owned by the listener.
#[derive(Debug, Default)]
struct Tasks {
    listen: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ListenerInner {
    config: ListenerConfig,
    runtime: Handle,
    connected: AtomicBool,
    listening: AtomicBool,
    reconnect_attempts: AtomicU32,
    /// Read half waiting to be picked up by a listen loop.
    reader: parking_lot::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    tasks: parking_lot::Mutex<Tasks>,
    on_ready: CallbackList<ReadySignal>,
    event_bus: EventBus<ReadySignal>,
}

/// Client for the test fixture's "ready" stream.
///
/// The fixture writes plain text over TCP; when a message containing the
/// configured marker arrives, every ready handler runs and a
/// [`ReadySignal`] is broadcast. The listener survives the fixture going
/// away: with auto-reconnect enabled, a lost connection starts a bounded
/// reconnect loop that resumes listening once it gets through.
///
/// # Runtime
///
/// The listen and reconnect loops are spawned on the [`Handle`] passed at
/// construction.
///
/// # Examples
///
/// ```no_run
/// use camtest_lib::config::ListenerConfig;
/// use camtest_lib::listener::StatusListener;
///
/// # async fn example() {
/// let listener = StatusListener::new(
///     ListenerConfig::new("192.168.1.5", 8080),
///     tokio::runtime::Handle::current(),
/// );
///
/// listener.on_ready(|signal| {
///     println!("[{}] fixture ready: {}", signal.timestamp, signal.message);
///     Ok(())
/// });
///
/// listener.connect().await;
/// listener.start_listening(true);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StatusListener {
    inner: Arc<ListenerInner>,
}

impl StatusListener {
    /// Creates a disconnected listener.
    #[must_use]
    pub fn new(config: ListenerConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                config,
                runtime,
                connected: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                reader: parking_lot::Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                tasks: parking_lot::Mutex::new(Tasks::default()),
                on_ready: CallbackList::new("ready"),
                event_bus: EventBus::new(),
            }),
        }
    }

    /// Returns the listener configuration.
    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.inner.config
    }

    /// Returns true while a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Returns true while listening, including while waiting to reconnect.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Returns the number of reconnect attempts since the last successful
    /// connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Returns true while a reconnect loop is running.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .tasks
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Opens the connection.
    ///
    /// Returns `true` on success, which also resets the reconnect counter.
    /// Does nothing if already connected.
    pub async fn connect(&self) -> bool {
        self.inner.try_connect().await.is_ok()
    }

    /// Like [`connect`](Self::connect), but returns the failure.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ConnectTimeout`] or [`ListenerError::Io`].
    pub async fn try_connect(&self) -> Result<(), ListenerError> {
        self.inner.try_connect().await
    }

    /// Starts the listen loop.
    ///
    /// If not connected, logs the failure and, with `auto_reconnect`, starts
    /// the reconnect loop, which begins listening once it gets through.
    /// Calling this while already listening has no effect.
    pub fn start_listening(&self, auto_reconnect: bool) {
        if !self.is_connected() {
            tracing::error!(addr = %self.inner.config.address(), "Cannot start listening: not connected");
            if auto_reconnect {
                self.inner.listening.store(true, Ordering::SeqCst);
                self.inner.start_reconnect();
            }
            return;
        }

        self.inner.listening.store(true, Ordering::SeqCst);
        self.inner.spawn_listen(auto_reconnect);
    }

    /// Closes the connection and stops every background loop.
    ///
    /// Safe to call from a ready handler and when already disconnected.
    pub async fn disconnect(&self) {
        self.inner.listening.store(false, Ordering::SeqCst);

        let (listen, reconnect) = {
            let mut tasks = self.inner.tasks.lock();
            tasks.cancel.cancel();
            tasks.cancel = CancellationToken::new();
            (tasks.listen.take(), tasks.reconnect.take())
        };
        // Abort rather than await; a ready handler may be waiting on us
        for task in [listen, reconnect].into_iter().flatten() {
            task.abort();
        }

        self.inner.reader.lock().take();
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let closed =
                tokio::time::timeout(self.inner.config.connect_timeout, writer.shutdown()).await;
            if let Ok(Err(e)) = closed {
                tracing::warn!(error = %e, "Status stream close error");
            }
        }

        self.inner.connected.store(false, Ordering::SeqCst);
        tracing::info!(addr = %self.inner.config.address(), "Status stream closed");
    }

    /// Writes a message, appending a newline if missing.
    ///
    /// A write failure marks the listener disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::NotConnected`] without writing anything if no
    /// connection is open, or [`ListenerError::Io`] if the write fails.
    pub async fn send(&self, message: &str) -> Result<(), ListenerError> {
        if !self.is_connected() {
            tracing::error!("Cannot send message: not connected");
            return Err(ListenerError::NotConnected);
        }

        let mut line = message.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            tracing::error!("Cannot send message: not connected");
            return Err(ListenerError::NotConnected);
        };

        let write = async {
            stream.write_all(line.as_bytes()).await?;
            stream.flush().await
        };
        let result = match tokio::time::timeout(self.inner.config.connect_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out")),
        };

        match result {
            Ok(()) => {
                tracing::debug!(message = %line.trim_end(), "Status message sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Status stream send error");
                self.inner.connected.store(false, Ordering::SeqCst);
                Err(ListenerError::Io(e))
            }
        }
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to ready signals on a broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReadySignal> {
        self.inner.event_bus.subscribe()
    }

    /// Registers a handler for ready signals.
    pub fn on_ready<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ReadySignal) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.on_ready.subscribe(callback)
    }

    /// Registers an awaited handler for ready signals.
    pub fn on_ready_async<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ReadySignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.inner.on_ready.subscribe_async(callback)
    }

    /// Removes a ready handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.on_ready.unsubscribe(id)
    }
}

impl ListenerInner {
    async fn try_connect(&self) -> Result<(), ListenerError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let addr = self.config.address();
        tracing::info!(addr = %addr, "Connecting to status stream");

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                if e.kind() == io::ErrorKind::ConnectionRefused {
                    tracing::error!(addr = %addr, "Status stream connection refused");
                } else {
                    tracing::error!(addr = %addr, error = %e, "Status stream connection error");
                }
                self.connected.store(false, Ordering::SeqCst);
                return Err(ListenerError::Io(e));
            }
            Err(_) => {
                tracing::error!(addr = %addr, "Status stream connection timeout");
                self.connected.store(false, Ordering::SeqCst);
                return Err(ListenerError::ConnectTimeout {
                    addr,
                    after: self.config.connect_timeout,
                });
            }
        };

        let (reader, writer) = stream.into_split();
        *self.reader.lock() = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(addr = %addr, "Status stream connected");
        Ok(())
    }

    fn spawn_listen(self: &Arc<Self>, auto_reconnect: bool) {
        let mut tasks = self.tasks.lock();
        if tasks.listen.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("Listen loop already running");
            return;
        }
        let Some(reader) = self.reader.lock().take() else {
            tracing::warn!("No open status stream to listen on");
            return;
        };

        let cancel = tasks.cancel.clone();
        tasks.listen = Some(self.runtime.spawn(listen_loop(
            Arc::downgrade(self),
            reader,
            auto_reconnect,
            cancel,
        )));
    }

    fn start_reconnect(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if tasks.reconnect.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("Reconnect loop already running");
            return;
        }
        let cancel = tasks.cancel.clone();
        tasks.reconnect = Some(
            self.runtime
                .spawn(reconnect_loop(Arc::downgrade(self), cancel)),
        );
    }

    fn connection_lost(self: &Arc<Self>, auto_reconnect: bool) {
        self.connected.store(false, Ordering::SeqCst);
        // Called from the listen loop itself, which is about to return
        self.tasks.lock().listen = None;
        if auto_reconnect {
            self.start_reconnect();
        } else {
            self.listening.store(false, Ordering::SeqCst);
        }
    }

    async fn fire_ready(&self, message: String) {
        tracing::info!(message = %message, "Fixture ready signal received");
        let signal = ReadySignal::now(message);
        self.on_ready.dispatch(&signal).await;
        self.event_bus.publish(signal);
    }
}

async fn listen_loop(
    inner: Weak<ListenerInner>,
    mut reader: OwnedReadHalf,
    auto_reconnect: bool,
    cancel: CancellationToken,
) {
    let Some((marker, receive_timeout)) = inner
        .upgrade()
        .map(|i| (i.config.ready_marker.clone(), i.config.receive_timeout))
    else {
        return;
    };

    tracing::info!("Status listener started");
    let mut detector = ReadyDetector::new(&marker);
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            read = tokio::time::timeout(receive_timeout, reader.read(&mut buf)) => read,
        };

        let Some(listener) = inner.upgrade() else {
            break;
        };

        match read {
            Err(_) => {
                tracing::debug!("Status receive timeout, still listening");
            }
            Ok(Ok(0)) => {
                tracing::warn!("Status stream closed by remote");
                listener.connection_lost(auto_reconnect);
                break;
            }
            Ok(Ok(n)) => {
                for message in detector.feed(&buf[..n]) {
                    listener.fire_ready(message).await;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Status stream read error");
                listener.connection_lost(auto_reconnect);
                break;
            }
        }
    }

    tracing::info!("Status listener stopped");
}

async fn reconnect_loop(inner: Weak<ListenerInner>, cancel: CancellationToken) {
    tracing::info!("Starting status stream reconnection");

    loop {
        let Some(listener) = inner.upgrade() else {
            return;
        };
        if listener.connected.load(Ordering::SeqCst) {
            return;
        }

        let max = listener.config.max_reconnect_attempts;
        let attempt = listener.reconnect_attempts.load(Ordering::SeqCst);
        if attempt >= max {
            tracing::error!(attempts = max, "Failed to reconnect to status stream, giving up");
            listener.listening.store(false, Ordering::SeqCst);
            return;
        }
        let attempt = listener.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(attempt, max, "Status stream reconnection attempt");

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = listener.try_connect() => result.is_ok(),
        };

        if connected {
            if listener.listening.load(Ordering::SeqCst) {
                listener.spawn_listen(true);
            }
            return;
        }

        let delay = listener.config.reconnect_delay;
        drop(listener);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unused_port_config() -> ListenerConfig {
        ListenerConfig::new("127.0.0.1", 9)
            .with_connect_timeout(Duration::from_millis(500))
            .with_reconnect_delay(Duration::from_millis(10))
            .with_max_reconnect_attempts(2)
    }

    #[tokio::test]
    async fn new_listener_is_idle() {
        let listener = StatusListener::new(ListenerConfig::default(), Handle::current());
        assert!(!listener.is_connected());
        assert!(!listener.is_listening());
        assert_eq!(listener.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn send_when_disconnected_is_refused() {
        let listener = StatusListener::new(ListenerConfig::default(), Handle::current());
        let err = listener.send("hello").await.unwrap_err();
        assert!(matches!(err, ListenerError::NotConnected));
    }

    #[tokio::test]
    async fn start_listening_without_connection_and_no_reconnect() {
        let listener = StatusListener::new(unused_port_config(), Handle::current());
        listener.start_listening(false);
        assert!(!listener.is_listening());
        assert!(!listener.is_reconnecting());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let listener = StatusListener::new(unused_port_config(), Handle::current());
        listener.disconnect().await;
        listener.disconnect().await;
        assert!(!listener.is_connected());
    }

    #[tokio::test]
    async fn ready_handlers_can_be_removed() {
        let listener = StatusListener::new(ListenerConfig::default(), Handle::current());
        let id = listener.on_ready(|_| Ok(()));
        assert!(listener.unsubscribe(id));
        assert!(!listener.unsubscribe(id));
    }
}

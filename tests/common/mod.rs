// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process fakes for the camera shell and the fixture status stream.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camtest_lib::config::{RegistryConfig, SessionConfig};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Installs a `tracing` subscriber honouring `RUST_LOG`, once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session settings short enough for tests against the fakes.
pub fn quick_session(port: u16) -> SessionConfig {
    SessionConfig::default()
        .with_port(port)
        .with_connect_timeout(Duration::from_secs(2))
        .with_command_timeout(Duration::from_secs(2))
        .with_auth_response_timeout(Duration::from_millis(500))
        .with_command_settle(Duration::from_millis(20))
        .with_retry_delay(Duration::from_millis(20))
        .with_max_retries(3)
}

/// Registry settings short enough for tests against the fakes.
pub fn quick_registry(port: u16) -> RegistryConfig {
    RegistryConfig::default()
        .with_session(quick_session(port))
        .with_health_check_interval(Duration::from_secs(60))
}

// ============================================================================
// Fake camera
// ============================================================================

/// How the fake camera answers one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echo, print the text, then the prompt.
    Output(String),
    /// Wait, then behave like `Output`.
    Delayed(Duration, String),
    /// Never answer.
    Silent,
    /// Close the connection.
    Hangup,
    /// Abort the connection with a TCP reset.
    Reset,
    /// Stop reading from the socket for good.
    Stall,
}

/// Behaviour of a fake camera.
#[derive(Debug, Clone)]
pub struct CameraScript {
    pub banner: String,
    pub login_reply: String,
    pub replies: HashMap<String, Reply>,
    /// Overrides keyed by 1-based connection number.
    pub per_connection: HashMap<(usize, String), Reply>,
}

impl Default for CameraScript {
    fn default() -> Self {
        Self {
            banner: "\r\ncam-0042 login: ".to_string(),
            login_reply: "\r\nBusyBox v1.31.1 built-in shell (ash)\r\n# ".to_string(),
            replies: HashMap::new(),
            per_connection: HashMap::new(),
        }
    }
}

impl CameraScript {
    pub fn reply(mut self, command: &str, reply: Reply) -> Self {
        self.replies.insert(command.to_string(), reply);
        self
    }

    /// Answers `command` this way on the `connection`-th accepted socket only.
    pub fn reply_on(mut self, connection: usize, command: &str, reply: Reply) -> Self {
        self.per_connection
            .insert((connection, command.to_string()), reply);
        self
    }

    pub fn output(self, command: &str, text: &str) -> Self {
        self.reply(command, Reply::Output(text.to_string()))
    }

    pub fn login_reply(mut self, text: &str) -> Self {
        self.login_reply = text.to_string();
        self
    }

    pub fn banner(mut self, text: &str) -> Self {
        self.banner = text.to_string();
        self
    }
}

/// A Telnet-like shell on `127.0.0.1` that logs every line it receives.
pub struct FakeCamera {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeCamera {
    pub async fn start() -> Self {
        Self::with_script(CameraScript::default()).await
    }

    pub async fn with_script(script: CameraScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let log = Arc::clone(&received);
        let count = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let number = count.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve_shell(socket, number, script.clone(), Arc::clone(&log)));
            }
        });

        Self {
            addr,
            received,
            connections,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every line received, across all connections, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    /// Number of accepted connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stops accepting; existing connections stay open.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_shell(
    socket: TcpStream,
    number: usize,
    script: CameraScript,
    log: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    if write.write_all(script.banner.as_bytes()).await.is_err() {
        return;
    }
    let Ok(Some(user)) = lines.next_line().await else {
        return;
    };
    log.lock().push(format!("login:{}", user.trim()));
    if write.write_all(script.login_reply.as_bytes()).await.is_err() {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        log.lock().push(command.clone());
        if command == "exit" {
            return;
        }

        let reply = script
            .per_connection
            .get(&(number, command.clone()))
            .or_else(|| script.replies.get(&command))
            .cloned()
            .unwrap_or_else(|| Reply::Output(String::new()));

        let text = match reply {
            Reply::Output(text) => text,
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
            Reply::Silent => continue,
            Reply::Hangup => return,
            Reply::Reset => {
                let read = lines.into_inner().into_inner();
                if let Ok(stream) = read.reunite(write) {
                    abort(stream);
                }
                return;
            }
            Reply::Stall => {
                std::future::pending::<()>().await;
                return;
            }
        };

        let mut response = format!("{command}\r\n");
        if !text.is_empty() {
            response.push_str(&text);
            response.push_str("\r\n");
        }
        response.push_str("# ");
        if write.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Closes `stream` with an RST instead of a FIN.
#[allow(deprecated)]
pub fn abort(stream: TcpStream) {
    let _ = stream.set_linger(Some(Duration::ZERO));
    drop(stream);
}

// ============================================================================
// Fake fixture
// ============================================================================

/// A status stream server that tests drive by hand.
pub struct FakeFixture {
    listener: TcpListener,
}

impl FakeFixture {
    pub async fn start() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Waits for the listener under test to connect.
    pub async fn accept(&self) -> FixtureConnection {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("listener did not connect")
            .unwrap();
        FixtureConnection { stream }
    }
}

/// One accepted status stream connection.
pub struct FixtureConnection {
    stream: TcpStream,
}

impl FixtureConnection {
    /// Writes `bytes` as a single segment and lets it reach the peer.
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Drops the connection with a TCP reset.
    pub fn reset(self) {
        abort(self.stream);
    }

    /// Reads one line written by the listener.
    pub async fn read_line(&mut self) -> String {
        let mut reader = BufReader::new(&mut self.stream);
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("no line from listener")
            .unwrap();
        line
    }
}

/// Returns a loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

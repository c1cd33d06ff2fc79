// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `camtest_lib` - device manager for a camera production test bench.
//!
//! The library keeps Telnet shell sessions open to a fleet of camera units
//! and listens for the test fixture's "ready" signal on a separate TCP
//! stream. The UI and persistence layers of the bench sit on top of it: they
//! ask for devices to be added, removed and tested, and they observe
//! lifecycle events.
//!
//! # Components
//!
//! - [`DeviceSession`]: one shell session with connect, login, serialized
//!   command execution and disconnect
//! - [`DeviceRegistry`]: the fleet, with a connection bound, a periodic
//!   health sweep and command fan-out
//! - [`CommandCatalog`]: logical tests (LED, IR LED, IR-cut, speaker) and
//!   their shell commands, with per-device toggle state
//! - [`StatusListener`]: reconnecting client for the fixture status stream
//!
//! # Quick Start
//!
//! ```no_run
//! use camtest_lib::{BenchConfig, CommandCatalog, DeviceRegistry, LogicalTest, StatusListener};
//!
//! #[tokio::main]
//! async fn main() -> camtest_lib::Result<()> {
//!     let config = BenchConfig::load("bench.toml")?;
//!     let runtime = tokio::runtime::Handle::current();
//!
//!     let listener = StatusListener::new(config.listener.clone(), runtime.clone());
//!     listener.on_ready(|signal| {
//!         println!("fixture ready at {}", signal.timestamp);
//!         Ok(())
//!     });
//!     listener.connect().await;
//!     listener.start_listening(true);
//!
//!     let registry = DeviceRegistry::new(config.registry.clone(), runtime);
//!     registry.on_connect(|event| {
//!         println!("{} connected", event.serial());
//!         Ok(())
//!     });
//!
//!     if registry.add_device("CAM001", "192.168.1.20").await {
//!         let catalog = CommandCatalog::new();
//!         let outcome = registry.run_test("CAM001", &catalog, LogicalTest::Led).await?;
//!         println!("{}: {}", outcome.label, outcome.success);
//!     }
//!
//!     registry.close_all().await;
//!     listener.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Failure Policy
//!
//! Device work fails soft. `connect` returns a boolean and keeps the reason
//! as the session's last error; command execution always returns a
//! [`CommandOutput`], and a read timeout counts as success. Observers that
//! fail are logged and skipped.
//!
//! # Logging
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod listener;
pub mod registry;
pub mod session;
pub mod subscription;

pub use catalog::{CommandCatalog, LogicalTest, TestOutcome};
pub use config::{BenchConfig, Credentials, ListenerConfig, RegistryConfig, SessionConfig};
pub use error::{ConfigError, Error, ListenerError, Result, SessionError, UnknownTest};
pub use event::{DeviceEvent, EventBus, EventKind, ReadySignal};
pub use listener::StatusListener;
pub use registry::DeviceRegistry;
pub use session::{
    CommandExecutor, CommandOutcome, CommandOutput, DeviceSession, SessionState, SessionStatus,
};
pub use subscription::SubscriptionId;

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logical bench tests and the shell commands behind them.
//!
//! Toggle tests (indicator LED, IR LED, IR-cut filter) alternate between on
//! and off on each run, starting from off, with the last commanded value
//! tracked per device. Sequence tests (speaker, system info, reboot) always
//! run the same steps.
//!
//! # Examples
//!
//! ```no_run
//! use camtest_lib::catalog::{CommandCatalog, LogicalTest};
//! use camtest_lib::session::DeviceSession;
//!
//! # async fn example(session: &DeviceSession) {
//! let catalog = CommandCatalog::new();
//!
//! let first = catalog.run(session, LogicalTest::Led).await;
//! assert_eq!(first.label, "LED_ON");
//! let second = catalog.run(session, LogicalTest::Led).await;
//! assert_eq!(second.label, "LED_OFF");
//! # }
//! ```

mod command_catalog;

pub use command_catalog::{CommandCatalog, CommandSpec, Step, TestOutcome};
pub use logical_test::LogicalTest;

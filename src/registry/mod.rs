// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fleet-wide session registry.
//!
//! The [`DeviceRegistry`] owns every live [`DeviceSession`](crate::session::DeviceSession),
//! bounds how many may exist and how many may be connecting at once, runs a
//! periodic health sweep while any session exists, and reports lifecycle
//! changes to observers.
//!
//! # Events
//!
//! Observers can either register callbacks ([`DeviceRegistry::on_connect`],
//! [`DeviceRegistry::on_disconnect`], [`DeviceRegistry::on_error`] and their
//! `_async` forms) or take a broadcast receiver with
//! [`DeviceRegistry::subscribe`]. A failing callback is logged and skipped.
//!
//! # Health sweep
//!
//! Every `health_check_interval` the registry sends a keep-alive to each
//! connected session. A session whose consecutive error count exceeds
//! `error_threshold` is disconnected and reconnected; a session that is not
//! connected is reconnected. A successful reconnect fires `connect`, a
//! failed one fires `error`.

mod device_registry;
mod health;

pub use device_registry::DeviceRegistry;
pub use crate::session::SessionStatus;

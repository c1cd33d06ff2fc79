// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event types and broadcast delivery.
//!
//! The registry and the status listener notify observers in two ways: through
//! callback lists (see [`crate::subscription`]) and through an [`EventBus`],
//! a tokio broadcast channel that any number of consumers can subscribe to.
//!
//! # Examples
//!
//! ```
//! use camtest_lib::event::{DeviceEvent, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(DeviceEvent::connected("CAM001"));
//! assert_eq!(rx.try_recv().unwrap().serial(), "CAM001");
//! ```

mod device_event;
mod event_bus;

pub use device_event::{DeviceEvent, EventKind, ReadySignal};
pub use event_bus::EventBus;

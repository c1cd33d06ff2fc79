// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback subscriptions for registry and listener events.
//!
//! This module provides the observer side of the event system:
//!
//! - [`SubscriptionId`] - A unique identifier for a subscription, used to unsubscribe
//! - [`CallbackList`] - An ordered list of synchronous or asynchronous handlers
//! - [`CallbackResult`] - What a handler returns; an `Err` is logged and ignored
//!
//! Dispatch isolates handlers from each other and from the caller: a handler
//! that returns an error or panics is logged, and the remaining handlers still
//! run.
//!
//! # Examples
//!
//! ```
//! use camtest_lib::DeviceRegistry;
//! use camtest_lib::config::RegistryConfig;
//!
//! # async fn example() {
//! let registry = DeviceRegistry::new(
//!     RegistryConfig::default(),
//!     tokio::runtime::Handle::current(),
//! );
//!
//! // Synchronous handler
//! let sub_id = registry.on_connect(|event| {
//!     println!("{} connected", event.serial());
//!     Ok(())
//! });
//!
//! // Asynchronous handler
//! registry.on_error_async(|event| async move {
//!     println!("{event:?}");
//!     Ok::<(), camtest_lib::subscription::CallbackError>(())
//! });
//!
//! registry.unsubscribe(sub_id);
//! # }
//! ```

mod callback;

pub use callback::{CallbackError, CallbackList, CallbackResult, SubscriptionId};

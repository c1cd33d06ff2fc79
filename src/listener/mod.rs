// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixture status stream.
//!
//! The test fixture announces that the board under test is powered and
//! ready by writing a marker (default `"I am ready"`) on a plain TCP
//! stream. [`StatusListener`] keeps that stream open, reconnecting with a
//! fixed delay and a bounded number of attempts, and feeds every chunk to a
//! [`ReadyDetector`].

mod detector;
mod status_listener;

pub use detector::{MAX_BUFFERED, ReadyDetector};
pub use status_listener::StatusListener;

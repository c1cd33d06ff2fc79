// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus for broadcasting device and fixture events.

use tokio::sync::broadcast;

use super::DeviceEvent;

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event bus for broadcasting events to multiple subscribers.
///
/// The `EventBus` uses tokio's broadcast channel so every subscriber gets its
/// own copy of each event. It is generic over the event type: the registry
/// uses `EventBus<DeviceEvent>` and the status listener uses
/// `EventBus<ReadySignal>`.
///
/// # Capacity
///
/// The event bus has a fixed capacity (default 256). If a subscriber falls
/// behind, older events are dropped for that subscriber and it receives
/// `RecvError::Lagged`.
///
/// # Examples
///
/// ```
/// use camtest_lib::event::{EventBus, ReadySignal};
///
/// let bus: EventBus<ReadySignal> = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(ReadySignal::now("I am ready"));
/// assert_eq!(rx.try_recv().unwrap().message, "I am ready");
/// ```
#[derive(Debug)]
pub struct EventBus<E = DeviceEvent> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all subscribers.
    ///
    /// If there are no subscribers, the event is silently discarded.
    pub fn publish(&self, event: E) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bus_has_no_subscribers() {
        let bus: EventBus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn drop_subscriber_decrements_count() {
        let bus: EventBus = EventBus::new();

        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn publish_delivers_to_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DeviceEvent::connected("CAM001"));

        assert_eq!(rx1.recv().await.unwrap().serial(), "CAM001");
        assert_eq!(rx2.recv().await.unwrap().serial(), "CAM001");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(DeviceEvent::disconnected("CAM001"));
    }

    #[test]
    fn clone_shares_same_channel() {
        let bus1: EventBus = EventBus::with_capacity(8);
        let bus2 = bus1.clone();

        let _rx = bus1.subscribe();
        assert_eq!(bus2.subscriber_count(), 1);
    }
}

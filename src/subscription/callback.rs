// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback storage and isolated dispatch.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Error type handlers may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by event handlers.
pub type CallbackResult = Result<(), CallbackError>;

type BoxFuture = Pin<Box<dyn Future<Output = CallbackResult> + Send>>;

/// Unique identifier for a subscription.
///
/// This ID is returned when registering a callback and can be used to
/// unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Creates a new subscription ID with the given value.
    #[must_use]
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Process-wide counter so IDs stay unique across lists.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> SubscriptionId {
    SubscriptionId::new(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
}

enum Handler<E> {
    Sync(Arc<dyn Fn(&E) -> CallbackResult + Send + Sync>),
    Async(Arc<dyn Fn(E) -> BoxFuture + Send + Sync>),
}

impl<E> Clone for Handler<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Async(f) => Self::Async(Arc::clone(f)),
        }
    }
}

/// An ordered list of event handlers.
///
/// Handlers run in registration order. Each one is invoked independently: an
/// `Err` result or a panic is logged with `tracing` and dispatch moves on to
/// the next handler.
///
/// # Thread Safety
///
/// The list is guarded by a `parking_lot::RwLock`, but the lock is released
/// before any handler runs, so handlers may register or unregister callbacks
/// on the same list without deadlocking.
pub struct CallbackList<E> {
    name: &'static str,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> CallbackList<E>
where
    E: Clone + Send + 'static,
{
    /// Creates an empty list; `name` labels log records.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a synchronous handler.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) -> CallbackResult + Send + Sync + 'static,
    {
        let id = next_id();
        self.handlers
            .write()
            .push((id, Handler::Sync(Arc::new(callback))));
        id
    }

    /// Registers a handler that must be awaited.
    pub fn subscribe_async<F, Fut>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        let id = next_id();
        let boxed = move |event: E| -> BoxFuture { Box::pin(callback(event)) };
        self.handlers
            .write()
            .push((id, Handler::Async(Arc::new(boxed))));
        id
    }

    /// Unregisters a handler.
    ///
    /// Returns `true` if a handler was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Removes all handlers.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Invokes every handler with `event`.
    ///
    /// Asynchronous handlers run on their own task so that a panic inside the
    /// future is contained. Returns the number of handlers that failed.
    pub async fn dispatch(&self, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        let mut failures = 0;
        for handler in handlers {
            let outcome = match handler {
                Handler::Sync(callback) => match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(result) => result,
                    Err(_) => Err("handler panicked".into()),
                },
                Handler::Async(callback) => match tokio::spawn(callback(event.clone())).await {
                    Ok(result) => result,
                    Err(join_err) => Err(join_err.to_string().into()),
                },
            };

            if let Err(e) = outcome {
                failures += 1;
                tracing::error!(callbacks = self.name, error = %e, "Callback failed");
            }
        }
        failures
    }
}

impl<E> std::fmt::Debug for CallbackList<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackList")
            .field("name", &self.name)
            .field("callback_count", &self.handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn subscription_id_display() {
        let id = SubscriptionId::new(42);
        assert_eq!(id.to_string(), "Sub(42)");
        assert_eq!(id.value(), 42);
    }

    #[test]
    fn ids_are_unique_across_lists() {
        let a: CallbackList<u32> = CallbackList::new("a");
        let b: CallbackList<u32> = CallbackList::new("b");

        let id1 = a.subscribe(|_| Ok(()));
        let id2 = b.subscribe(|_| Ok(()));
        let id3 = a.subscribe_async(|_| async { Ok::<(), CallbackError>(()) });

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[tokio::test]
    async fn dispatch_runs_sync_and_async_handlers_in_order() {
        let list: CallbackList<u32> = CallbackList::new("test");
        let seen = Arc::new(RwLock::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        list.subscribe(move |value| {
            s1.write().push(("sync", *value));
            Ok(())
        });
        let s2 = Arc::clone(&seen);
        list.subscribe_async(move |value| {
            let s2 = Arc::clone(&s2);
            async move {
                s2.write().push(("async", value));
                Ok::<(), CallbackError>(())
            }
        });

        let failures = list.dispatch(&7).await;

        assert_eq!(failures, 0);
        assert_eq!(*seen.read(), vec![("sync", 7), ("async", 7)]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_dispatch() {
        let list: CallbackList<String> = CallbackList::new("test");
        let counter = Arc::new(AtomicU32::new(0));

        list.subscribe(|_| Err("observer is broken".into()));
        list.subscribe(|_| panic!("observer panicked"));
        list.subscribe_async(|_| async { Err::<(), CallbackError>("async failure".into()) });
        list.subscribe_async(|value: String| async move {
            assert!(value.is_empty(), "async panic");
            Ok::<(), CallbackError>(())
        });

        let c = Arc::clone(&counter);
        list.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let failures = list.dispatch(&"CAM001".to_string()).await;

        assert_eq!(failures, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let list: CallbackList<u32> = CallbackList::new("test");
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let id = list.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(list.len(), 1);

        list.dispatch(&1).await;
        assert!(list.unsubscribe(id));
        assert!(list.is_empty());
        list.dispatch(&2).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!list.unsubscribe(id));
    }

    #[test]
    fn clear_and_debug() {
        let list: CallbackList<u32> = CallbackList::new("connect");
        list.subscribe(|_| Ok(()));
        list.subscribe(|_| Ok(()));

        let debug = format!("{list:?}");
        assert!(debug.contains("connect"));
        assert!(debug.contains("callback_count"));

        list.clear();
        assert!(list.is_empty());
    }
}

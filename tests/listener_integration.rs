// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Status listener tests against an in-process fake fixture.

mod common;

use std::sync::Arc;
use std::time::Duration;

use camtest_lib::{ListenerConfig, ListenerError, ReadySignal, StatusListener};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use common::{FakeFixture, closed_port, init_tracing, wait_until};

fn config(port: u16) -> ListenerConfig {
    ListenerConfig::new("127.0.0.1", port)
        .with_connect_timeout(Duration::from_millis(500))
        .with_receive_timeout(Duration::from_millis(200))
        .with_reconnect_delay(Duration::from_millis(20))
        .with_max_reconnect_attempts(3)
}

/// Starts a listener that records every ready message.
async fn listening(port: u16) -> (StatusListener, Arc<Mutex<Vec<String>>>) {
    let listener = StatusListener::new(config(port), Handle::current());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    listener.on_ready(move |signal: &ReadySignal| {
        sink.lock().push(signal.message.clone());
        Ok(())
    });
    assert!(listener.connect().await);
    listener.start_listening(true);
    (listener, seen)
}

// ============================================================================
// Ready detection
// ============================================================================

mod ready {
    use super::*;

    #[tokio::test]
    async fn marker_split_across_segments_fires_once() {
        init_tracing();
        let fixture = FakeFixture::start().await;
        let (listener, seen) = listening(fixture.port()).await;
        let mut conn = fixture.accept().await;

        conn.send(b"DUT 3: I am re").await;
        conn.send(b"ady\n").await;

        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.lock().clone(), vec!["DUT 3: I am ready".to_string()]);
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn marker_without_newline_fires_once() {
        let fixture = FakeFixture::start().await;
        let (listener, seen) = listening(fixture.port()).await;
        let mut conn = fixture.accept().await;

        conn.send(b"i AM READY").await;
        conn.send(b" and waiting").await;

        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.lock().len(), 1);
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn unrelated_lines_are_ignored() {
        let fixture = FakeFixture::start().await;
        let (listener, seen) = listening(fixture.port()).await;
        let mut conn = fixture.accept().await;

        conn.send(b"heartbeat\nfixture idle\n").await;
        conn.send(b"I am ready\n").await;

        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1).await);
        assert_eq!(seen.lock()[0], "I am ready");
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn ready_signal_is_broadcast() {
        let fixture = FakeFixture::start().await;
        let (listener, _seen) = listening(fixture.port()).await;
        let mut signals = listener.subscribe();
        let mut conn = fixture.accept().await;

        conn.send(b"I am ready\n").await;

        let signal = tokio::time::timeout(Duration::from_secs(1), signals.recv())
            .await
            .expect("no ready signal")
            .unwrap();
        assert_eq!(signal.message, "I am ready");
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn idle_stream_keeps_listening() {
        let fixture = FakeFixture::start().await;
        let (listener, seen) = listening(fixture.port()).await;
        let mut conn = fixture.accept().await;

        // Several receive windows pass without data
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(listener.is_connected());
        assert!(listener.is_listening());

        conn.send(b"I am ready\n").await;
        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1).await);
        listener.disconnect().await;
    }
}

// ============================================================================
// Connection
// ============================================================================

mod connection {
    use super::*;

    #[tokio::test]
    async fn send_appends_newline() {
        let fixture = FakeFixture::start().await;
        let listener = StatusListener::new(config(fixture.port()), Handle::current());
        assert!(listener.connect().await);
        let mut conn = fixture.accept().await;

        listener.send("START DUT 3").await.unwrap();

        assert_eq!(conn.read_line().await, "START DUT 3\n");
        listener.disconnect().await;
        assert!(matches!(
            listener.send("late").await,
            Err(ListenerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let fixture = FakeFixture::start().await;
        let listener = StatusListener::new(config(fixture.port()), Handle::current());

        assert!(listener.connect().await);
        let _conn = fixture.accept().await;
        assert!(listener.connect().await);
        assert!(listener.is_connected());
        listener.disconnect().await;
        assert!(!listener.is_connected());
    }

    #[tokio::test]
    async fn gives_up_after_max_reconnect_attempts() {
        let fixture = FakeFixture::start().await;
        let (listener, _seen) = listening(fixture.port()).await;
        let conn = fixture.accept().await;
        drop(fixture);

        // Fixture goes away for good
        drop(conn);

        assert!(
            wait_until(Duration::from_secs(3), || !listener.is_listening()).await,
            "listener kept retrying"
        );
        assert!(!listener.is_connected());
        assert_eq!(listener.reconnect_attempts(), 3);
    }

    #[tokio::test]
    async fn reconnect_resumes_listening() {
        let fixture = FakeFixture::start().await;
        let (listener, seen) = listening(fixture.port()).await;

        let first = fixture.accept().await;
        drop(first);

        let mut second = fixture.accept().await;
        assert!(wait_until(Duration::from_secs(1), || listener.is_connected()).await);
        assert_eq!(listener.reconnect_attempts(), 0);
        assert!(listener.is_listening());

        second.send(b"I am ready\n").await;
        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1).await);
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn reset_stream_is_reconnected() {
        let fixture = FakeFixture::start().await;
        let (listener, seen) = listening(fixture.port()).await;

        let first = fixture.accept().await;
        // Let the listen loop block on a read before the reset lands
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.reset();

        let mut second = fixture.accept().await;
        assert!(wait_until(Duration::from_secs(1), || listener.is_connected()).await);
        assert!(listener.is_listening());

        second.send(b"I am ready\n").await;
        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1).await);
        listener.disconnect().await;
    }

    #[tokio::test]
    async fn start_listening_while_down_waits_for_fixture() {
        let port = closed_port().await;
        let listener = StatusListener::new(
            config(port).with_max_reconnect_attempts(50),
            Handle::current(),
        );
        assert!(!listener.connect().await);

        listener.start_listening(true);
        assert!(listener.is_listening());
        assert!(wait_until(Duration::from_secs(1), || listener.reconnect_attempts() > 0).await);
        listener.disconnect().await;
        assert!(!listener.is_listening());
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_harmless() {
        let listener = StatusListener::new(config(closed_port().await), Handle::current());
        listener.disconnect().await;
        listener.disconnect().await;
        assert!(!listener.is_connected());
        assert!(!listener.is_listening());
    }
}

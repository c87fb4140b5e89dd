//! Tests for server runtime behaviour.

use std::{
    io,
    sync::{Arc, Mutex},
};

use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::{Semaphore, oneshot},
    task::yield_now,
    time::{Duration, Instant, advance, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{AcceptLoopOptions, BackoffConfig, MockAcceptListener, accept_loop};
use crate::{
    config::MllpConfig,
    protocol::envelope,
    server::{
        connection::ConnectionContext,
        test_util::{TestHandler, bind_server, free_listener, handler},
    },
};

const MESSAGE: &[u8] = b"MSH|^~\\&|APP|FAC|RAPP|RFAC|20240101||ADT^A01|7|P|2.5\r";

#[rstest]
#[tokio::test]
async fn run_with_immediate_shutdown(handler: TestHandler, free_listener: std::net::TcpListener) {
    let server = bind_server(handler, MllpConfig::default(), free_listener);
    let shutdown_future = async { tokio::time::sleep(Duration::from_millis(10)).await };
    let result = timeout(
        Duration::from_millis(1000),
        server.run_with_shutdown(shutdown_future),
    )
    .await;
    assert!(result.expect("server did not finish in time").is_ok());
}

#[rstest]
#[tokio::test]
async fn ready_signal_fires(handler: TestHandler, free_listener: std::net::TcpListener) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = bind_server(handler, MllpConfig::default(), free_listener).ready_signal(ready_tx);
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("ready signal");
    let _ = stop_tx.send(());
    handle
        .await
        .expect("server join error")
        .expect("server run failed");
}

#[rstest]
#[tokio::test]
async fn messages_over_tcp_are_acknowledged(
    handler: TestHandler,
    free_listener: std::net::TcpListener,
) {
    let addr = free_listener.local_addr().expect("local addr");
    let server = bind_server(handler.clone(), MllpConfig::default(), free_listener);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(&envelope(MESSAGE)).await.expect("write");
    let mut wire = Vec::new();
    let mut buf = [0u8; 256];
    while !wire.ends_with(&[0x1c, 0x1d]) {
        let n = stream.read(&mut buf).await.expect("read");
        assert_ne!(n, 0, "server closed before acknowledging");
        wire.extend_from_slice(&buf[..n]);
    }
    assert!(wire.ends_with(b"\rMSA|AA|7\r\x1c\x1d"));

    let _ = stop_tx.send(());
    handle
        .await
        .expect("server join error")
        .expect("server run failed");
    assert_eq!(handler.received.lock().expect("lock").len(), 1);
}

#[rstest]
#[tokio::test]
async fn connections_beyond_limit_are_reset(
    handler: TestHandler,
    free_listener: std::net::TcpListener,
) {
    let addr = free_listener.local_addr().expect("local addr");
    let config = MllpConfig::default().max_concurrent_connections(1);
    let server = bind_server(handler, config, free_listener);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let _first = TcpStream::connect(addr).await.expect("first connect");
    // The reset can land before the handshake completes on some platforms.
    match TcpStream::connect(addr).await {
        Ok(mut second) => {
            let mut buf = [0u8; 8];
            let outcome = timeout(Duration::from_secs(2), second.read(&mut buf))
                .await
                .expect("second connection should be released");
            match outcome {
                Ok(0) => {}
                Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
                Ok(n) => panic!("unexpected {n} bytes from rejected connection"),
            }
        }
        Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
    }

    let _ = stop_tx.send(());
    handle
        .await
        .expect("server join error")
        .expect("server run failed");
}

fn context(handler: TestHandler) -> ConnectionContext<TestHandler> {
    ConnectionContext {
        handler: Arc::new(handler),
        config: Arc::new(MllpConfig::default()),
        permits: Arc::new(Semaphore::new(1)),
        shutdown: CancellationToken::new(),
    }
}

#[rstest]
#[tokio::test]
async fn accept_loop_stops_on_shutdown(handler: TestHandler) {
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();
    let listener = Arc::new(
        tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener"),
    );

    tracker.spawn(accept_loop(
        listener,
        context(handler),
        AcceptLoopOptions {
            accept_timeout: Duration::from_secs(60),
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig::default(),
        },
    ));

    token.cancel();
    tracker.close();

    let result = timeout(Duration::from_millis(100), tracker.wait()).await;
    assert!(result.is_ok());
}

/// Creates a mock listener whose every accept fails, logging call times.
fn failing_listener(calls: &Arc<Mutex<Vec<Instant>>>, num_calls: usize) -> MockAcceptListener {
    let mut listener = MockAcceptListener::new();
    let call_log = Arc::clone(calls);
    listener
        .expect_accept()
        .returning(move || {
            let call_log = Arc::clone(&call_log);
            Box::pin(async move {
                call_log.lock().expect("lock").push(Instant::now());
                Err(io::Error::other("mock error"))
            })
        })
        .times(num_calls);
    listener
        .expect_local_addr()
        .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
        .times(num_calls);
    listener
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn accept_failures_back_off_exponentially(handler: TestHandler) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 4));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(accept_loop(
        listener,
        context(handler),
        AcceptLoopOptions {
            accept_timeout: Duration::from_secs(60),
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        },
    ));

    yield_now().await;
    for ms in [5, 10, 20] {
        advance(Duration::from_millis(ms)).await;
        yield_now().await;
    }

    token.cancel();
    tracker.close();
    tracker.wait().await;

    let calls = calls.lock().expect("lock");
    let intervals: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        intervals,
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(20),
        ]
    );
}

#[rstest]
#[case::inverted(Duration::from_millis(50), Duration::from_millis(5), 5, 50)]
#[case::zero(Duration::ZERO, Duration::ZERO, 1, 1)]
#[case::ordered(Duration::from_millis(10), Duration::from_secs(1), 10, 1000)]
fn backoff_is_normalised(
    #[case] initial: Duration,
    #[case] max: Duration,
    #[case] expected_initial_ms: u64,
    #[case] expected_max_ms: u64,
) {
    let cfg = BackoffConfig {
        initial_delay: initial,
        max_delay: max,
    }
    .normalized();
    assert_eq!(cfg.initial_delay, Duration::from_millis(expected_initial_ms));
    assert_eq!(cfg.max_delay, Duration::from_millis(expected_max_ms));
}

#[test]
fn backoff_doubles_up_to_cap_and_resets() {
    let mut backoff = BackoffConfig {
        initial_delay: Duration::from_millis(300),
        max_delay: Duration::from_millis(1000),
    }
    .start();
    let delays: Vec<_> = (0..4).map(|_| backoff.failed().as_millis()).collect();
    assert_eq!(delays, [300, 600, 1000, 1000]);
    assert_eq!(backoff.failures(), 4);

    backoff.succeeded();
    assert_eq!(backoff.failures(), 0);
    assert_eq!(backoff.failed(), Duration::from_millis(300));
}

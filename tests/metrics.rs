#![cfg(feature = "metrics")]
//! Tests for `mllp` metrics.
//!
//! Reader and writer traffic runs under a `metrics_util` debugging recorder
//! and the resulting counters are checked by name and label.

use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use mllp::{
    MllpSocketReader,
    MllpSocketWriter,
    Role,
    metrics::{
        CONNECTION_RESETS,
        CONNECTIONS_ACTIVE,
        ERRORS_TOTAL,
        FRAMES_PROCESSED,
        OUT_OF_BAND_BYTES,
    },
    protocol::envelope,
};
use mllp_testing::{
    loopback,
    metrics::{counter, record},
};
use rstest::rstest;
use tokio::io::AsyncWriteExt;

const MESSAGE: &[u8] = b"MSH|^~\\&|APP|FAC|RAPP|RFAC|20240101||ADT^A01|7|P|2.5\rPID|1\r";

fn reader() -> MllpSocketReader {
    MllpSocketReader::new(
        Role::Message,
        Duration::from_millis(500),
        Duration::from_millis(200),
    )
}

#[test]
fn inbound_frames_and_noise_are_counted() {
    let (payload, snapshot) = record(async {
        let (mut conn, mut peer, _) = loopback();
        let mut wire = b"noise".to_vec();
        wire.extend_from_slice(&envelope(MESSAGE));
        peer.write_all(&wire).await.expect("write");
        reader().read(&mut conn).await.expect("read")
    });
    assert_eq!(payload.as_deref(), Some(MESSAGE));

    let snapshot = snapshot.into_vec();
    let inbound = snapshot.iter().any(|(key, _, _, value)| {
        key.key().name() == FRAMES_PROCESSED
            && key
                .key()
                .labels()
                .any(|l| l.key() == "direction" && l.value() == "inbound")
            && key
                .key()
                .labels()
                .any(|l| l.key() == "role" && l.value() == "message")
            && matches!(value, DebugValue::Counter(1))
    });
    assert!(inbound, "inbound frame not recorded: {snapshot:#?}");
    let noise = snapshot.iter().any(|(key, _, _, value)| {
        key.key().name() == OUT_OF_BAND_BYTES && matches!(value, DebugValue::Counter(5))
    });
    assert!(noise, "out-of-band bytes not recorded: {snapshot:#?}");
}

#[rstest]
#[case::buffered(mllp::WriteStrategy::Buffered)]
#[case::unbuffered(mllp::WriteStrategy::Unbuffered)]
fn outbound_acknowledgements_are_counted(#[case] strategy: mllp::WriteStrategy) {
    let ((), snapshot) = record(async {
        let (mut conn, _peer, _) = loopback();
        let mut writer = MllpSocketWriter::new(Role::Acknowledgement).strategy(strategy);
        for _ in 0..2 {
            writer.write(&mut conn, MESSAGE).await.expect("write");
        }
    });
    assert_eq!(
        counter(
            snapshot,
            FRAMES_PROCESSED,
            &[("direction", "outbound"), ("role", "acknowledgement")]
        ),
        2
    );
}

#[test]
fn corrupt_frame_counts_error_and_reset() {
    let (result, snapshot) = record(async {
        let (mut conn, mut peer, _) = loopback();
        peer.write_all(b"\x0bMSH|1\x0bMSH|2\x1c\x1d")
            .await
            .expect("write");
        reader().read(&mut conn).await
    });
    assert!(result.is_err());

    let snapshot = snapshot.into_vec();
    let has_counter = |name: &str, label: Option<(&str, &str)>| {
        snapshot.iter().any(|(key, _, _, value)| {
            key.key().name() == name
                && label.is_none_or(|(k, v)| {
                    key.key().labels().any(|l| l.key() == k && l.value() == v)
                })
                && matches!(value, DebugValue::Counter(1))
        })
    };
    assert!(has_counter(ERRORS_TOTAL, Some(("type", "corrupt_frame"))));
    assert!(has_counter(CONNECTION_RESETS, None));
}

#[test]
fn connection_gauge_tracks_open_connections() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::with_local_recorder(&recorder, || {
        mllp::metrics::inc_connections();
        mllp::metrics::inc_connections();
        mllp::metrics::dec_connections();
    });

    let metrics = snapshotter.snapshot().into_vec();
    assert!(
        metrics.iter().any(|(key, _, _, value)| {
            key.key().name() == CONNECTIONS_ACTIVE
                && matches!(value, DebugValue::Gauge(g) if (g.into_inner() - 1.0).abs() < f64::EPSILON)
        }),
        "expected {CONNECTIONS_ACTIVE} == 1, got {metrics:#?}"
    );
}

//! Run async code under a `metrics_util` debugging recorder.

use std::future::Future;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshot};

/// Drive `fut` to completion on a fresh current-thread runtime with a local
/// debugging recorder installed, returning its output and the recorded
/// metrics.
///
/// The recorder is thread-local, so `fut` must not hand work to other
/// threads.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
pub fn record<F: Future>(fut: F) -> (F::Output, Snapshot) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");
    let output = ::metrics::with_local_recorder(&recorder, || runtime.block_on(fut));
    (output, snapshotter.snapshot())
}

/// Sum of every counter named `name` whose labels include all of `labels`.
#[must_use]
pub fn counter(snapshot: Snapshot, name: &str, labels: &[(&str, &str)]) -> u64 {
    snapshot
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| {
            key.key().name() == name
                && labels.iter().all(|(k, v)| {
                    key.key()
                        .labels()
                        .any(|label| label.key() == *k && label.value() == *v)
                })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(c) => c,
            _ => 0,
        })
        .sum()
}

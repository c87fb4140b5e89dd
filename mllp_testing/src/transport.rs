//! An in-memory [`Transport`] that records how it was torn down.

use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use mllp::{MllpConnection, Transport};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, duplex};

/// Capacity of the duplex pipe created by [`loopback`].
pub const LOOPBACK_CAPACITY: usize = 64 * 1024;

/// Counts of teardown calls observed by a [`RecordingTransport`].
///
/// Cloned handles share the same counters, so a test can keep one after the
/// transport has been moved into a connection and dropped.
#[derive(Clone, Debug, Default)]
pub struct TeardownLog {
    resets: Arc<AtomicUsize>,
    input_shutdowns: Arc<AtomicUsize>,
}

impl TeardownLog {
    /// Number of times the transport was prepared for an abortive close.
    #[must_use]
    pub fn resets(&self) -> usize { self.resets.load(Ordering::SeqCst) }

    /// Number of times input was shut down for an orderly close.
    #[must_use]
    pub fn closes(&self) -> usize { self.input_shutdowns.load(Ordering::SeqCst) }
}

/// Duplex-backed transport recording `set_linger_zero` and `shutdown_input`
/// calls.
#[derive(Debug)]
pub struct RecordingTransport {
    inner: DuplexStream,
    log: TeardownLog,
}

impl RecordingTransport {
    /// Wrap `inner`, recording into `log`.
    #[must_use]
    pub fn new(inner: DuplexStream, log: TeardownLog) -> Self { Self { inner, log } }
}

impl AsyncRead for RecordingTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RecordingTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Transport for RecordingTransport {
    fn set_linger_zero(&self) -> io::Result<()> {
        self.log.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown_input(&self) -> io::Result<()> {
        self.log.input_shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An open connection over a recording transport, the peer end of the pipe
/// and the teardown log.
#[must_use]
pub fn loopback() -> (MllpConnection<RecordingTransport>, DuplexStream, TeardownLog) {
    let (local, peer) = duplex(LOOPBACK_CAPACITY);
    let log = TeardownLog::default();
    let conn = MllpConnection::new(RecordingTransport::new(local, log.clone()));
    (conn, peer, log)
}

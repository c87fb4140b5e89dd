//! Connection ownership and teardown.
//!
//! [`MllpConnection`] wraps a [`Transport`] together with an explicit
//! lifecycle state. Readers and writers borrow it mutably for exactly one
//! operation at a time; whoever created it decides when to release it.
//!
//! Both teardown paths are idempotent and never fail: they run from inside
//! other failures' handling, so any error they hit is logged and swallowed.

mod options;
mod transport;

use std::fmt;

use log::{debug, warn};
pub use options::SocketOptions;
use tokio::io::AsyncWriteExt;
pub use transport::Transport;

use crate::protocol::DEFAULT_BUFFER_SIZE;

/// Lifecycle of an [`MllpConnection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport has been attached yet.
    Unconnected,
    /// The transport is usable.
    Open,
    /// The transport was closed or reset and has been released.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unconnected => "unconnected",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// A transport owned by one sequential caller.
///
/// # Examples
///
/// ```
/// use mllp::connection::{ConnectionState, MllpConnection};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (local, _remote) = tokio::io::duplex(64);
/// let mut conn = MllpConnection::new(local);
/// assert_eq!(conn.state(), ConnectionState::Open);
/// conn.reset().await;
/// conn.reset().await;
/// assert_eq!(conn.state(), ConnectionState::Closed);
/// # }
/// ```
pub struct MllpConnection<T> {
    transport: Option<T>,
    state: ConnectionState,
    address: String,
}

impl<T: Transport> MllpConnection<T> {
    /// Wrap an established transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        let address = describe(transport.local_addr(), transport.peer_addr());
        Self {
            transport: Some(transport),
            state: ConnectionState::Open,
            address,
        }
    }

    /// A connection with no transport attached.
    #[must_use]
    pub fn unconnected() -> Self {
        Self {
            transport: None,
            state: ConnectionState::Unconnected,
            address: describe(None, None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.state }

    /// `true` while the transport is usable.
    #[must_use]
    pub fn is_open(&self) -> bool { self.state == ConnectionState::Open }

    /// `local -> remote` rendering of the transport's addresses, captured
    /// when the transport was attached.
    #[must_use]
    pub fn address(&self) -> &str { &self.address }

    /// Mutable access to the transport while the connection is open.
    pub fn transport_mut(&mut self) -> Option<&mut T> {
        match self.state {
            ConnectionState::Open => self.transport.as_mut(),
            _ => None,
        }
    }

    /// Shared access to the transport while the connection is open.
    #[must_use]
    pub fn transport(&self) -> Option<&T> {
        match self.state {
            ConnectionState::Open => self.transport.as_ref(),
            _ => None,
        }
    }

    /// Receive buffer size hint, falling back to
    /// [`DEFAULT_BUFFER_SIZE`](crate::protocol::DEFAULT_BUFFER_SIZE).
    #[must_use]
    pub fn receive_buffer_size(&self) -> usize {
        self.transport
            .as_ref()
            .and_then(Transport::recv_buffer_size)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    /// Send buffer size hint, falling back to
    /// [`DEFAULT_BUFFER_SIZE`](crate::protocol::DEFAULT_BUFFER_SIZE).
    #[must_use]
    pub fn send_buffer_size(&self) -> usize {
        self.transport
            .as_ref()
            .and_then(Transport::send_buffer_size)
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    /// Orderly shutdown: stop input, stop output, then release the transport.
    pub async fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            debug!(
                "close ignored: address={}, state={}",
                self.address, self.state
            );
            self.state = ConnectionState::Closed;
            return;
        };
        debug!("closing connection: address={}", self.address);
        if let Err(e) = transport.shutdown_input() {
            warn!(
                "failed to shut down input: address={}, error={e}",
                self.address
            );
        }
        if let Err(e) = transport.shutdown().await {
            warn!(
                "failed to shut down output: address={}, error={e}",
                self.address
            );
        }
        drop(transport);
        self.state = ConnectionState::Closed;
    }

    /// Forceful abort: set linger to zero then release the transport so the
    /// peer sees a reset rather than an orderly end of stream.
    pub async fn reset(&mut self) {
        let Some(transport) = self.transport.take() else {
            debug!(
                "reset ignored: address={}, state={}",
                self.address, self.state
            );
            self.state = ConnectionState::Closed;
            return;
        };
        debug!("resetting connection: address={}", self.address);
        if let Err(e) = transport.set_linger_zero() {
            warn!(
                "failed to set linger before reset: address={}, error={e}",
                self.address
            );
        }
        drop(transport);
        self.state = ConnectionState::Closed;
        crate::metrics::inc_connection_resets();
    }

    /// Release the transport without any teardown.
    #[must_use]
    pub fn into_inner(self) -> Option<T> { self.transport }
}

impl<T> fmt::Debug for MllpConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MllpConnection")
            .field("state", &self.state)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn describe(local: Option<std::net::SocketAddr>, peer: Option<std::net::SocketAddr>) -> String {
    let render = |addr: Option<std::net::SocketAddr>| {
        addr.map_or_else(|| "null".to_owned(), |a| a.to_string())
    };
    format!("{} -> {}", render(local), render(peer))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;

    #[tokio::test]
    async fn close_is_idempotent_and_signals_end_of_stream() {
        let (local, mut remote) = duplex(64);
        let mut conn = MllpConnection::new(local);
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        let mut buf = [0u8; 8];
        assert_eq!(remote.read(&mut buf).await.expect("read"), 0);
    }

    #[tokio::test]
    async fn reset_releases_transport() {
        let (local, _remote) = duplex(64);
        let mut conn = MllpConnection::new(local);
        conn.reset().await;
        assert!(conn.transport_mut().is_none());
        assert!(conn.into_inner().is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn teardown_of_unconnected_connection_is_a_no_op(#[values(true, false)] reset: bool) {
        let mut conn = MllpConnection::<tokio::io::DuplexStream>::unconnected();
        if reset {
            conn.reset().await;
        } else {
            conn.close().await;
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn buffer_hints_fall_back_to_default() {
        let (local, _remote) = duplex(64);
        let conn = MllpConnection::new(local);
        assert_eq!(conn.receive_buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(conn.send_buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(conn.address(), "null -> null");
    }

    #[tokio::test]
    async fn tcp_reset_is_observed_by_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = tokio::net::TcpStream::connect(addr).await.expect("connect");
        let (mut server, _) = listener.accept().await.expect("accept");

        let mut conn = MllpConnection::new(client);
        assert!(conn.address().ends_with(&addr.to_string()));
        assert!(conn.receive_buffer_size() > 0);
        conn.reset().await;

        let mut buf = [0u8; 8];
        match server.read(&mut buf).await {
            Ok(0) => {}
            Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
            Ok(n) => panic!("unexpected {n} bytes"),
        }
    }
}

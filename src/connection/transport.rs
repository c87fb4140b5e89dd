//! Byte-stream transports the framing layer can drive.

use std::{
    io,
    net::{Shutdown, SocketAddr},
    time::Duration,
};

use socket2::SockRef;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// A bidirectional byte stream with the control surface needed to tear it
/// down gracefully or forcefully.
///
/// Only the async read/write halves are required for framing. The remaining
/// methods back [`MllpConnection::close`](super::MllpConnection::close) and
/// [`MllpConnection::reset`](super::MllpConnection::reset) and have no-op
/// defaults for in-memory streams.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Arrange for the next close to abort the connection instead of
    /// performing an orderly shutdown.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the socket layer.
    fn set_linger_zero(&self) -> io::Result<()> { Ok(()) }

    /// Stop receiving; subsequent reads on either end observe end of stream.
    ///
    /// # Errors
    ///
    /// Returns any error reported by the socket layer.
    fn shutdown_input(&self) -> io::Result<()> { Ok(()) }

    /// Send buffer size reported by the transport, if known.
    fn send_buffer_size(&self) -> Option<usize> { None }

    /// Receive buffer size reported by the transport, if known.
    fn recv_buffer_size(&self) -> Option<usize> { None }

    /// Local address, if the transport has one.
    fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Remote address, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> { None }
}

impl Transport for TcpStream {
    fn set_linger_zero(&self) -> io::Result<()> { SockRef::from(self).set_linger(Some(Duration::ZERO)) }

    fn shutdown_input(&self) -> io::Result<()> { SockRef::from(self).shutdown(Shutdown::Read) }

    fn send_buffer_size(&self) -> Option<usize> { SockRef::from(self).send_buffer_size().ok() }

    fn recv_buffer_size(&self) -> Option<usize> { SockRef::from(self).recv_buffer_size().ok() }

    fn local_addr(&self) -> Option<SocketAddr> { TcpStream::local_addr(self).ok() }

    fn peer_addr(&self) -> Option<SocketAddr> { TcpStream::peer_addr(self).ok() }
}

impl Transport for tokio::io::DuplexStream {}

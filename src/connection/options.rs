//! Socket options for MLLP connections.

use std::{io, net::SocketAddr, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream};

use crate::protocol::DEFAULT_SOCKET_BUFFER_SIZE;

/// Socket options applied to outbound sockets before connecting and to
/// accepted sockets before the first read.
///
/// Unset options leave the operating-system default in place.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mllp::connection::SocketOptions;
///
/// let options = SocketOptions::default()
///     .nodelay(true)
///     .keepalive(Some(Duration::from_secs(30)));
/// let expected = SocketOptions::default()
///     .keepalive(Some(Duration::from_secs(30)))
///     .nodelay(true);
/// assert_eq!(options, expected);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    nodelay: Option<bool>,
    keepalive: Option<KeepAliveSetting>,
    linger: Option<LingerSetting>,
    send_buffer_size: Option<u32>,
    recv_buffer_size: Option<u32>,
    reuseaddr: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LingerSetting {
    Disabled,
    Duration(Duration),
}

impl LingerSetting {
    const fn to_option(self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Duration(value) => Some(value),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeepAliveSetting {
    Disabled,
    Duration(Duration),
}

impl SocketOptions {
    /// Options matching the usual MLLP endpoint defaults: `TCP_NODELAY` on
    /// and 8 KiB socket buffers.
    #[must_use]
    pub fn recommended() -> Self {
        Self::default()
            .nodelay(true)
            .send_buffer_size(DEFAULT_SOCKET_BUFFER_SIZE)
            .recv_buffer_size(DEFAULT_SOCKET_BUFFER_SIZE)
    }

    /// Configure `TCP_NODELAY` behaviour on the socket.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Configure `SO_KEEPALIVE`; `Some` enables it with the given idle time.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use mllp::connection::SocketOptions;
    ///
    /// let options = SocketOptions::default().keepalive(None);
    /// assert_ne!(options, SocketOptions::default());
    /// ```
    #[must_use]
    pub fn keepalive(mut self, duration: Option<Duration>) -> Self {
        self.keepalive = Some(match duration {
            Some(value) => KeepAliveSetting::Duration(value),
            None => KeepAliveSetting::Disabled,
        });
        self
    }

    /// Configure `SO_LINGER`.
    #[must_use]
    pub fn linger(mut self, duration: Option<Duration>) -> Self {
        self.linger = Some(match duration {
            Some(value) => LingerSetting::Duration(value),
            None => LingerSetting::Disabled,
        });
        self
    }

    /// Configure the socket send buffer size.
    #[must_use]
    pub fn send_buffer_size(mut self, size: u32) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Configure the socket receive buffer size.
    #[must_use]
    pub fn recv_buffer_size(mut self, size: u32) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Configure `SO_REUSEADDR`.
    #[must_use]
    pub fn reuseaddr(mut self, enabled: bool) -> Self {
        self.reuseaddr = Some(enabled);
        self
    }

    /// Open a socket for `addr`, apply the options and connect.
    ///
    /// # Errors
    ///
    /// Returns any error from socket creation, option application or the
    /// connect itself.
    pub async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        self.apply(&socket)?;
        socket.connect(addr).await
    }

    pub(crate) fn apply(&self, socket: &TcpSocket) -> io::Result<()> {
        if let Some(enabled) = self.nodelay {
            socket.set_nodelay(enabled)?;
        }
        if let Some(linger) = self.linger {
            SockRef::from(socket).set_linger(linger.to_option())?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(enabled) = self.reuseaddr {
            socket.set_reuseaddr(enabled)?;
        }
        self.apply_keepalive(&SockRef::from(socket))
    }

    /// Apply the options that still matter once a socket is connected.
    ///
    /// `SO_REUSEADDR` is ignored here.
    pub(crate) fn apply_to_stream(&self, stream: &TcpStream) -> io::Result<()> {
        let sock = SockRef::from(stream);
        if let Some(enabled) = self.nodelay {
            stream.set_nodelay(enabled)?;
        }
        if let Some(linger) = self.linger {
            sock.set_linger(linger.to_option())?;
        }
        if let Some(size) = self.send_buffer_size {
            sock.set_send_buffer_size(size as usize)?;
        }
        if let Some(size) = self.recv_buffer_size {
            sock.set_recv_buffer_size(size as usize)?;
        }
        self.apply_keepalive(&sock)
    }

    fn apply_keepalive(&self, sock: &SockRef<'_>) -> io::Result<()> {
        match self.keepalive {
            Some(KeepAliveSetting::Duration(duration)) => {
                sock.set_keepalive(true)?;
                sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(duration))
            }
            Some(KeepAliveSetting::Disabled) => sock.set_keepalive(false),
            None => Ok(()),
        }
    }
}

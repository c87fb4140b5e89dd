//! MLLP client runtime implementation.

use std::{fmt, io, net::SocketAddr};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::{
    net::TcpStream,
    time::{Instant, timeout},
};

use super::ClientError;
use crate::{
    config::{IdleTimeoutStrategy, MllpConfig},
    connection::MllpConnection,
    error::{MllpError, Role},
    hl7::{AcknowledgementCode, PrintFriendly, invalid_payload_message, process_acknowledgement},
    reader::MllpSocketReader,
    writer::MllpSocketWriter,
};

/// Acknowledgement returned by [`MllpClient::send`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Acknowledgement payload with framing removed.
    pub payload: Bytes,
    /// MSA-1 code, when the acknowledgement carried one.
    pub code: Option<AcknowledgementCode>,
}

/// Sends HL7 messages over one MLLP connection.
///
/// The connection is opened on first use and re-opened after any failure
/// that released it. A connection left idle for longer than the configured
/// idle timeout is closed or reset before the next send.
///
/// # Examples
///
/// ```no_run
/// use std::net::SocketAddr;
///
/// use mllp::{MllpConfig, client::MllpClient};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), mllp::client::ClientError> {
/// let addr: SocketAddr = "127.0.0.1:2575".parse().expect("valid socket address");
/// let mut client = MllpClient::new(addr, MllpConfig::default());
/// let ack = client
///     .send(b"MSH|^~\\&|APP|FAC|RAPP|RFAC|20240101||ADT^A01|1|P|2.5\r")
///     .await?;
/// println!("{:?}", ack.code);
/// # Ok(())
/// # }
/// ```
pub struct MllpClient {
    addr: SocketAddr,
    config: MllpConfig,
    connection: MllpConnection<TcpStream>,
    reader: MllpSocketReader,
    writer: MllpSocketWriter,
    require_msa: bool,
    last_activity: Option<Instant>,
}

impl fmt::Debug for MllpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MllpClient")
            .field("addr", &self.addr)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl MllpClient {
    /// Create a client for `addr`. No connection is made until the first
    /// send.
    #[must_use]
    pub fn new(addr: SocketAddr, config: MllpConfig) -> Self {
        Self {
            addr,
            reader: config.reader(Role::Acknowledgement),
            writer: config.writer(Role::Message),
            config,
            connection: MllpConnection::unconnected(),
            require_msa: true,
            last_activity: None,
        }
    }

    /// Treat an acknowledgement without an MSA segment as an error when
    /// `true` (the default).
    #[must_use]
    pub fn require_msa(mut self, required: bool) -> Self {
        self.require_msa = required;
        self
    }

    /// Peer address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// `true` while a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool { self.connection.is_open() }

    /// Open the connection if it is not already open.
    ///
    /// # Errors
    ///
    /// [`MllpError::Connect`] when the connection cannot be established
    /// within the connect timeout.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        self.release_if_idle().await;
        if self.connection.is_open() {
            return Ok(());
        }
        let connect = self.config.socket_options.connect(self.addr);
        let stream = match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(self.connect_error(source).into()),
            Err(_) => {
                let source = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                return Err(self.connect_error(source).into());
            }
        };
        self.connection = MllpConnection::new(stream);
        self.last_activity = Some(Instant::now());
        info!("connected: address={}", self.connection.address());
        Ok(())
    }

    /// Send `message` and wait for its acknowledgement.
    ///
    /// A failed write is retried once on a fresh connection. A transport
    /// failure while reading the acknowledgement reconnects, resends and
    /// reads once more.
    ///
    /// # Errors
    ///
    /// [`ClientError::RetriesExhausted`] when the retry also fails, and
    /// [`ClientError::Mllp`] wrapping:
    /// - [`MllpError::Connect`] when the connection cannot be opened;
    /// - [`MllpError::Timeout`] when no acknowledgement arrives in time (the
    ///   connection is reset);
    /// - [`MllpError::CorruptFrame`] for a malformed acknowledgement frame;
    /// - [`MllpError::InvalidAcknowledgement`] for an invalid or
    ///   unclassifiable acknowledgement;
    /// - [`MllpError::NegativeAcknowledgement`] for an error or reject code.
    pub async fn send(&mut self, message: &[u8]) -> Result<Acknowledgement, ClientError> {
        let message = Bytes::copy_from_slice(message);
        self.write_with_retry(&message).await?;

        let ack = match self.read_acknowledgement().await {
            Ok(ack) => ack,
            Err(err) if is_transport_failure(&err) => {
                warn!("acknowledgement read failed; resending: addr={}, error={err}", self.addr);
                self.connection.reset().await;
                self.connect().await?;
                self.write(&message).await.map_err(retries_exhausted)?;
                self.read_acknowledgement().await.map_err(retries_exhausted)?
            }
            Err(err) => return Err(err.into()),
        };
        self.last_activity = Some(Instant::now());

        if self.config.validate_payload
            && let Some(reason) = invalid_payload_message(&ack, ack.len())
        {
            return Err(MllpError::InvalidAcknowledgement {
                message: reason,
                payload: message,
                acknowledgement: Some(ack),
            }
            .into());
        }
        let code = process_acknowledgement(&message, &ack, self.require_msa)?;
        debug!(
            "acknowledgement received: addr={}, code={code:?}, acknowledgement={}",
            self.addr,
            PrintFriendly(&ack)
        );
        Ok(Acknowledgement { payload: ack, code })
    }

    /// Send `message` without waiting for an acknowledgement.
    ///
    /// # Errors
    ///
    /// As for the write half of [`send`](Self::send).
    pub async fn send_only(&mut self, message: &[u8]) -> Result<(), ClientError> {
        self.write_with_retry(&Bytes::copy_from_slice(message)).await?;
        self.last_activity = Some(Instant::now());
        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) { self.connection.close().await; }

    /// Abort the connection.
    pub async fn reset(&mut self) { self.connection.reset().await; }

    async fn write_with_retry(&mut self, message: &Bytes) -> Result<(), ClientError> {
        self.connect().await?;
        if let Err(err) = self.write(message).await {
            warn!("write failed; reconnecting: addr={}, error={err}", self.addr);
            self.connection.reset().await;
            self.connect().await?;
            self.write(message).await.map_err(retries_exhausted)?;
        }
        Ok(())
    }

    async fn write(&mut self, message: &[u8]) -> Result<(), MllpError> {
        self.writer.write(&mut self.connection, message).await
    }

    async fn read_acknowledgement(&mut self) -> Result<Bytes, MllpError> {
        match self.reader.read(&mut self.connection).await? {
            Some(ack) => Ok(ack),
            None => {
                warn!(
                    "no acknowledgement within receive timeout; resetting: addr={}, timeout={:?}",
                    self.addr,
                    self.reader.receive_timeout()
                );
                self.connection.reset().await;
                Err(MllpError::Timeout {
                    role: Role::Acknowledgement,
                    partial: Bytes::new(),
                })
            }
        }
    }

    async fn release_if_idle(&mut self) {
        let (Some(idle), Some(last)) = (self.config.idle_timeout, self.last_activity) else {
            return;
        };
        if !self.connection.is_open() || last.elapsed() < idle {
            return;
        }
        debug!(
            "releasing idle connection: addr={}, strategy={:?}",
            self.addr, self.config.idle_timeout_strategy
        );
        match self.config.idle_timeout_strategy {
            IdleTimeoutStrategy::Reset => self.connection.reset().await,
            IdleTimeoutStrategy::Close => self.connection.close().await,
        }
    }

    fn connect_error(&self, source: io::Error) -> MllpError {
        warn!("connect failed: addr={}, error={source}", self.addr);
        crate::metrics::inc_errors("connect");
        MllpError::Connect {
            address: self.addr.to_string(),
            source,
        }
    }
}

fn is_transport_failure(err: &MllpError) -> bool {
    matches!(
        err,
        MllpError::Receive { .. } | MllpError::EndOfStream { .. }
    )
}

fn retries_exhausted(last: MllpError) -> ClientError {
    ClientError::RetriesExhausted { attempts: 2, last }
}

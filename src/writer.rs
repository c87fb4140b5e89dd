//! Writing MLLP frames to a connection.

use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::io::AsyncWriteExt;

use crate::{
    connection::{ConnectionState, MllpConnection, Transport},
    error::{MllpError, Role},
    metrics::{self, Direction},
    protocol::{END_OF_BLOCK, END_OF_DATA, START_OF_BLOCK, envelope_into},
};

/// How a frame is handed to the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Assemble the whole frame in memory and write it at once.
    #[default]
    Buffered,
    /// Write the start marker, payload and terminator bytes separately.
    Unbuffered,
}

/// Writes framed payloads for one connection.
///
/// Both strategies put identical bytes on the wire; they differ only in the
/// number of writes issued to the transport.
///
/// # Examples
///
/// ```
/// use mllp::{MllpConnection, MllpSocketWriter, Role, protocol::envelope};
/// use tokio::io::AsyncReadExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), mllp::MllpError> {
/// let (local, mut remote) = tokio::io::duplex(256);
/// let mut conn = MllpConnection::new(local);
/// let mut writer = MllpSocketWriter::new(Role::Acknowledgement);
/// writer.write(&mut conn, b"MSA|AA|1\r").await?;
///
/// let mut wire = vec![0; 12];
/// remote.read_exact(&mut wire).await.expect("read");
/// assert_eq!(wire, envelope(b"MSA|AA|1\r"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MllpSocketWriter {
    role: Role,
    strategy: WriteStrategy,
    buffer: BytesMut,
}

impl Default for MllpSocketWriter {
    fn default() -> Self { Self::new(Role::Message) }
}

impl MllpSocketWriter {
    /// Create a buffered writer for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            strategy: WriteStrategy::default(),
            buffer: BytesMut::new(),
        }
    }

    /// Choose the write strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Role used to tag errors.
    #[must_use]
    pub fn role(&self) -> Role { self.role }

    /// Strategy in use.
    #[must_use]
    pub fn write_strategy(&self) -> WriteStrategy { self.strategy }

    /// Frame `payload` and write it, then flush.
    ///
    /// An empty payload is sent as an empty frame after logging a warning.
    ///
    /// # Errors
    ///
    /// [`MllpError::NotConnected`] or [`MllpError::ConnectionClosed`] when
    /// the connection is not open; nothing is written. [`MllpError::Write`]
    /// when the transport fails, after which the connection must not be
    /// reused.
    pub async fn write<T: Transport>(
        &mut self,
        conn: &mut MllpConnection<T>,
        payload: &[u8],
    ) -> Result<(), MllpError> {
        match conn.state() {
            ConnectionState::Unconnected => {
                return Err(MllpError::NotConnected { role: self.role });
            }
            ConnectionState::Closed => {
                return Err(MllpError::ConnectionClosed { role: self.role });
            }
            ConnectionState::Open => {}
        }
        if payload.is_empty() {
            warn!(
                "writing empty {} frame: address={}",
                self.role,
                conn.address()
            );
        }
        if self.strategy == WriteStrategy::Buffered && self.buffer.capacity() == 0 {
            self.buffer = BytesMut::with_capacity(conn.send_buffer_size());
        }

        let address = conn.address().to_owned();
        let Some(transport) = conn.transport_mut() else {
            return Err(MllpError::ConnectionClosed { role: self.role });
        };
        let result = match self.strategy {
            WriteStrategy::Buffered => {
                envelope_into(payload, &mut self.buffer);
                let result = write_all_and_flush(transport, &self.buffer).await;
                self.buffer.clear();
                result
            }
            WriteStrategy::Unbuffered => write_pieces(transport, payload).await,
        };

        match result {
            Ok(()) => {
                tracing::debug!(
                    role = %self.role,
                    address = %address,
                    len = payload.len(),
                    "frame written"
                );
                metrics::inc_frames(Direction::Outbound, self.role);
                Ok(())
            }
            Err(source) => {
                let err = MllpError::Write {
                    role: self.role,
                    source,
                    payload: Bytes::copy_from_slice(payload),
                };
                warn!("write failed: address={address}, error={err}");
                metrics::inc_errors(err.error_type());
                Err(err)
            }
        }
    }
}

async fn write_all_and_flush<T: Transport>(transport: &mut T, bytes: &[u8]) -> std::io::Result<()> {
    transport.write_all(bytes).await?;
    transport.flush().await
}

async fn write_pieces<T: Transport>(transport: &mut T, payload: &[u8]) -> std::io::Result<()> {
    transport.write_all(&[START_OF_BLOCK]).await?;
    transport.write_all(payload).await?;
    transport.write_all(&[END_OF_BLOCK]).await?;
    transport.write_all(&[END_OF_DATA]).await?;
    transport.flush().await
}

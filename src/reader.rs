//! Reading MLLP frames from a connection.
//!
//! [`MllpSocketReader`] turns the byte stream of an [`MllpConnection`] back
//! into payloads. A frame usually arrives in one read and is sliced straight
//! out of the receive buffer; frames spanning several reads are accumulated
//! in an overflow buffer that is only touched on that slower path.
//!
//! Two deadlines apply. `receive_timeout` bounds each read while looking for
//! the start of a frame; expiry there means "nothing to read yet" and leaves
//! the connection open. `read_timeout` bounds each read once a frame has
//! started; expiry there loses the frame boundary, so the connection is
//! reset before the error is returned. The same holds for every other
//! receive failure.

use std::{io, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use log::{debug, warn};
use tokio::{io::AsyncReadExt, time::timeout};

use crate::{
    connection::{ConnectionState, MllpConnection, Transport},
    error::{CorruptFrameReason, MllpError, Role},
    hl7::PrintFriendly,
    metrics::{self, Direction},
    protocol::{
        DEFAULT_READ_TIMEOUT,
        DEFAULT_RECEIVE_TIMEOUT,
        END_OF_BLOCK,
        END_OF_DATA,
        START_OF_BLOCK,
    },
    scanner,
};

/// Reads framed payloads for one connection.
///
/// A reader keeps its buffers between calls and must not be shared between
/// connections.
///
/// # Examples
///
/// ```
/// use mllp::{MllpConnection, MllpSocketReader, Role, protocol::envelope};
/// use tokio::io::AsyncWriteExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), mllp::MllpError> {
/// let (local, mut remote) = tokio::io::duplex(256);
/// remote.write_all(&envelope(b"MSH|^~\\&|A\r")).await.expect("write");
///
/// let mut conn = MllpConnection::new(local);
/// let mut reader = MllpSocketReader::default();
/// let payload = reader.read(&mut conn).await?;
/// assert_eq!(payload.as_deref(), Some(&b"MSH|^~\\&|A\r"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MllpSocketReader {
    role: Role,
    receive_timeout: Duration,
    read_timeout: Duration,
    require_end_of_data: bool,
    max_payload_size: Option<usize>,
    buffer: Vec<u8>,
    overflow: BytesMut,
}

impl Default for MllpSocketReader {
    fn default() -> Self { Self::new(Role::Message, DEFAULT_RECEIVE_TIMEOUT, DEFAULT_READ_TIMEOUT) }
}

enum ReadOutcome {
    Data(usize),
    Eof,
    TimedOut,
    Failed(io::Error),
}

enum Scan {
    /// Payload ends at `payload_end`; the terminator ends at `frame_end`.
    Complete { payload_end: usize, frame_end: usize },
    Incomplete,
    Corrupt { reason: CorruptFrameReason, at: usize },
}

impl MllpSocketReader {
    /// Create a reader for `role` with the given deadlines.
    #[must_use]
    pub fn new(role: Role, receive_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            role,
            receive_timeout,
            read_timeout,
            require_end_of_data: true,
            max_payload_size: None,
            buffer: Vec::new(),
            overflow: BytesMut::new(),
        }
    }

    /// Accept a lone `END_OF_BLOCK` as the end of a frame when `false`.
    #[must_use]
    pub fn require_end_of_data(mut self, required: bool) -> Self {
        self.require_end_of_data = required;
        self
    }

    /// Reject frames whose payload exceeds `max` bytes.
    #[must_use]
    pub fn max_payload_size(mut self, max: Option<usize>) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Role used to tag errors.
    #[must_use]
    pub fn role(&self) -> Role { self.role }

    /// Deadline applied while looking for the start of a frame.
    #[must_use]
    pub fn receive_timeout(&self) -> Duration { self.receive_timeout }

    /// Deadline applied to each read inside a frame.
    #[must_use]
    pub fn read_timeout(&self) -> Duration { self.read_timeout }

    /// Read the next payload. See [`read_framed_payload`](Self::read_framed_payload).
    ///
    /// # Errors
    ///
    /// As for [`read_framed_payload`](Self::read_framed_payload).
    pub async fn read<T: Transport>(
        &mut self,
        conn: &mut MllpConnection<T>,
    ) -> Result<Option<Bytes>, MllpError> {
        self.read_framed_payload(conn, None).await
    }

    /// Read the next payload, excluding all framing bytes.
    ///
    /// `first_byte` is a byte the caller has already taken off the stream.
    /// When it is `START_OF_BLOCK` the frame is treated as started and the
    /// read deadline applies from the first read; any other value is
    /// discarded as out-of-band.
    ///
    /// Returns `Ok(None)` when no frame starts within the receive timeout;
    /// the connection stays open. Bytes outside a frame are logged and
    /// dropped. Bytes already available after the frame are drained and
    /// dropped without waiting for more.
    ///
    /// # Errors
    ///
    /// [`MllpError::NotConnected`] and [`MllpError::ConnectionClosed`] when
    /// the connection is not open; the stream is not touched. Otherwise a
    /// [`MllpError::Timeout`], [`MllpError::EndOfStream`],
    /// [`MllpError::CorruptFrame`] or [`MllpError::Receive`] carrying the
    /// partial payload, raised after the connection has been reset.
    pub async fn read_framed_payload<T: Transport>(
        &mut self,
        conn: &mut MllpConnection<T>,
        first_byte: Option<u8>,
    ) -> Result<Option<Bytes>, MllpError> {
        match conn.state() {
            ConnectionState::Unconnected => return Err(MllpError::NotConnected { role: self.role }),
            ConnectionState::Closed => {
                return Err(MllpError::ConnectionClosed { role: self.role });
            }
            ConnectionState::Open => {}
        }
        if self.buffer.is_empty() {
            self.buffer = vec![0; conn.receive_buffer_size()];
        }
        self.overflow.clear();

        let (body_start, filled) = if first_byte == Some(START_OF_BLOCK) {
            (0, 0)
        } else {
            if let Some(byte) = first_byte {
                self.discard(conn, &[byte]);
            }
            match self.find_frame_start(conn).await? {
                Some(found) => found,
                None => return Ok(None),
            }
        };

        match self.scan(&self.buffer[body_start..filled], 0) {
            Scan::Complete {
                payload_end,
                frame_end,
            } => {
                let payload =
                    Bytes::copy_from_slice(&self.buffer[body_start..body_start + payload_end]);
                self.discard(conn, &self.buffer[body_start + frame_end..filled]);
                return Ok(Some(self.finish(conn, payload)));
            }
            Scan::Corrupt { reason, at } => {
                let partial = Bytes::copy_from_slice(&self.buffer[body_start..body_start + at]);
                let err = self.corrupt(reason, partial);
                return self.fail(conn, err).await;
            }
            Scan::Incomplete => {}
        }

        self.overflow
            .extend_from_slice(&self.buffer[body_start..filled]);
        loop {
            let checked = self.overflow.len();
            let err = match read_once(conn, &mut self.buffer, self.read_timeout).await {
                ReadOutcome::Data(n) => {
                    self.overflow.extend_from_slice(&self.buffer[..n]);
                    None
                }
                ReadOutcome::TimedOut => Some(MllpError::Timeout {
                    role: self.role,
                    partial: self.overflow.split().freeze(),
                }),
                ReadOutcome::Eof => Some(MllpError::EndOfStream {
                    role: self.role,
                    partial: self.overflow.split().freeze(),
                }),
                ReadOutcome::Failed(source) => Some(MllpError::Receive {
                    role: self.role,
                    source,
                    partial: self.overflow.split().freeze(),
                }),
            };
            if let Some(err) = err {
                return self.fail(conn, err).await;
            }

            match self.scan(&self.overflow, checked) {
                Scan::Complete {
                    payload_end,
                    frame_end,
                } => {
                    let mut frame = self.overflow.split();
                    let trailing = frame.split_off(frame_end);
                    frame.truncate(payload_end);
                    self.discard(conn, &trailing);
                    return Ok(Some(self.finish(conn, frame.freeze())));
                }
                Scan::Corrupt { reason, at } => {
                    let mut partial = self.overflow.split();
                    partial.truncate(at);
                    let err = self.corrupt(reason, partial.freeze());
                    return self.fail(conn, err).await;
                }
                Scan::Incomplete => {}
            }
        }
    }

    /// Read until a start marker is seen. Returns the offset of the first
    /// payload byte and the number of valid bytes in the buffer.
    async fn find_frame_start<T: Transport>(
        &mut self,
        conn: &mut MllpConnection<T>,
    ) -> Result<Option<(usize, usize)>, MllpError> {
        loop {
            match read_once(conn, &mut self.buffer, self.receive_timeout).await {
                ReadOutcome::TimedOut => {
                    tracing::trace!(
                        role = %self.role,
                        address = conn.address(),
                        "no frame started within receive timeout"
                    );
                    return Ok(None);
                }
                ReadOutcome::Eof => {
                    let err = MllpError::EndOfStream {
                        role: self.role,
                        partial: Bytes::new(),
                    };
                    return self.fail(conn, err).await;
                }
                ReadOutcome::Failed(source) => {
                    let err = MllpError::Receive {
                        role: self.role,
                        source,
                        partial: Bytes::new(),
                    };
                    return self.fail(conn, err).await;
                }
                ReadOutcome::Data(n) => match scanner::find_start(&self.buffer, n) {
                    Some(start) => {
                        self.discard(conn, &self.buffer[..start]);
                        return Ok(Some((start + 1, n)));
                    }
                    None => self.discard(conn, &self.buffer[..n]),
                },
            }
        }
    }

    /// Classify `body` (bytes after the start marker). Bytes before `checked`
    /// have been classified already; the scan restarts one byte earlier so a
    /// terminator split across reads is still found.
    fn scan(&self, body: &[u8], checked: usize) -> Scan {
        let from = checked.saturating_sub(1).min(body.len());
        let region = &body[from..];
        let terminator = if self.require_end_of_data {
            scanner::find_end(region, region.len())
        } else {
            scanner::find_end_of_block(region, region.len())
        };

        let Some(offset) = terminator else {
            if let Some(pos) = scanner::find_start(region, region.len()) {
                return Scan::Corrupt {
                    reason: CorruptFrameReason::UnexpectedStartOfBlock,
                    at: from + pos,
                };
            }
            if self.require_end_of_data {
                if let Some(pos) = scanner::find_malformed_end(region, region.len()) {
                    return Scan::Corrupt {
                        reason: CorruptFrameReason::MalformedTerminator,
                        at: from + pos,
                    };
                }
            }
            let pending = body.len() - usize::from(body.last() == Some(&END_OF_BLOCK));
            return match self.max_payload_size {
                Some(max) if pending > max => Scan::Corrupt {
                    reason: CorruptFrameReason::Oversized { max },
                    at: max,
                },
                _ => Scan::Incomplete,
            };
        };

        let mut end = from + offset;
        if let Some(pos) = scanner::find_start(&body[from..end], end - from) {
            // A start marker before the last terminator belongs to trailing
            // bytes when an earlier terminator closes this frame first.
            let earlier = if self.require_end_of_data {
                scanner::find_end(&body[from..from + pos], pos)
            } else {
                None
            };
            let Some(earlier) = earlier else {
                return Scan::Corrupt {
                    reason: CorruptFrameReason::UnexpectedStartOfBlock,
                    at: from + pos,
                };
            };
            end = from + earlier;
        }
        if self.require_end_of_data {
            let span = &body[from..=end];
            if let Some(pos) = scanner::find_malformed_end(span, span.len()) {
                return Scan::Corrupt {
                    reason: CorruptFrameReason::MalformedTerminator,
                    at: from + pos,
                };
            }
        }
        if let Some(max) = self.max_payload_size.filter(|&max| end > max) {
            return Scan::Corrupt {
                reason: CorruptFrameReason::Oversized { max },
                at: max,
            };
        }
        let frame_end = if self.require_end_of_data || body.get(end + 1) == Some(&END_OF_DATA) {
            end + 2
        } else {
            end + 1
        };
        Scan::Complete {
            payload_end: end,
            frame_end,
        }
    }

    fn corrupt(&self, reason: CorruptFrameReason, partial: Bytes) -> MllpError {
        MllpError::CorruptFrame {
            role: self.role,
            reason,
            partial,
        }
    }

    /// Drain whatever is already available, record the frame and hand back
    /// the payload.
    fn finish<T: Transport>(&mut self, conn: &mut MllpConnection<T>, payload: Bytes) -> Bytes {
        loop {
            let Some(transport) = conn.transport_mut() else {
                break;
            };
            let ready = transport.read(&mut self.buffer).now_or_never();
            match ready {
                Some(Ok(n)) if n > 0 => self.discard(conn, &self.buffer[..n]),
                _ => break,
            }
        }
        tracing::debug!(
            role = %self.role,
            address = conn.address(),
            len = payload.len(),
            "frame received"
        );
        metrics::inc_frames(Direction::Inbound, self.role);
        payload
    }

    fn discard<T: Transport>(&self, conn: &MllpConnection<T>, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        debug!(
            "discarding out-of-band bytes: role={}, address={}, count={}, bytes={}",
            self.role,
            conn.address(),
            bytes.len(),
            PrintFriendly(bytes)
        );
        metrics::add_out_of_band_bytes(bytes.len());
    }

    async fn fail<T: Transport, R>(
        &self,
        conn: &mut MllpConnection<T>,
        err: MllpError,
    ) -> Result<R, MllpError> {
        warn!(
            "receive failed, resetting connection: role={}, address={}, error={err}",
            self.role,
            conn.address()
        );
        conn.reset().await;
        metrics::inc_errors(err.error_type());
        Err(err)
    }
}

async fn read_once<T: Transport>(
    conn: &mut MllpConnection<T>,
    buf: &mut [u8],
    deadline: Duration,
) -> ReadOutcome {
    let Some(transport) = conn.transport_mut() else {
        return ReadOutcome::Failed(io::Error::from(io::ErrorKind::NotConnected));
    };
    match timeout(deadline, transport.read(buf)).await {
        Err(_) => ReadOutcome::TimedOut,
        Ok(Ok(0)) => ReadOutcome::Eof,
        Ok(Ok(n)) => ReadOutcome::Data(n),
        Ok(Err(e)) => ReadOutcome::Failed(e),
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;

//! MLLP framing as a `tokio_util` codec.
//!
//! [`MllpFrameCodec`] lets MLLP streams be driven through
//! [`Framed`](tokio_util::codec::Framed). Unlike
//! [`MllpSocketReader`](crate::MllpSocketReader) it never discards bytes
//! following a frame, so pipelined frames decode one after another.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use log::debug;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::CorruptFrameReason,
    hl7::PrintFriendly,
    metrics,
    protocol::{END_OF_DATA, envelope_into},
    scanner,
};

/// Errors raised while decoding or encoding MLLP frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The byte stream violated the framing rules.
    #[error("corrupt frame after {bytes_received} payload bytes: {reason}")]
    Corrupt {
        /// Which rule was broken.
        reason: CorruptFrameReason,
        /// Payload bytes received before the violation.
        bytes_received: usize,
    },
    /// The stream ended inside a frame.
    #[error("end of stream mid-frame: {bytes_received} payload bytes received")]
    Eof {
        /// Payload bytes received before the stream ended.
        bytes_received: usize,
    },
    /// An outgoing payload exceeds the configured maximum.
    #[error("payload of {size} bytes exceeds maximum of {max}")]
    Oversized {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Transport failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decoder and encoder for MLLP frames.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use mllp::codec::MllpFrameCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = MllpFrameCodec::default();
/// let mut buf = BytesMut::from(&b"\x0bMSH|1\r\x1c\x1d\x0bMSH|2\r\x1c\x1d"[..]);
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"MSH|1\r"[..]));
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(&b"MSH|2\r"[..]));
/// ```
#[derive(Clone, Debug)]
pub struct MllpFrameCodec {
    require_end_of_data: bool,
    max_payload_size: Option<usize>,
    in_frame: bool,
    scanned: usize,
}

impl Default for MllpFrameCodec {
    fn default() -> Self {
        Self {
            require_end_of_data: true,
            max_payload_size: None,
            in_frame: false,
            scanned: 0,
        }
    }
}

impl MllpFrameCodec {
    /// Accept a lone `END_OF_BLOCK` as the end of a frame when `false`.
    #[must_use]
    pub fn require_end_of_data(mut self, required: bool) -> Self {
        self.require_end_of_data = required;
        self
    }

    /// Reject payloads larger than `max` bytes in both directions.
    #[must_use]
    pub fn max_payload_size(mut self, max: Option<usize>) -> Self {
        self.max_payload_size = max;
        self
    }

    fn abandon(
        &mut self,
        src: &mut BytesMut,
        bytes_received: usize,
        consumed: usize,
        reason: CorruptFrameReason,
    ) -> FrameError {
        self.in_frame = false;
        self.scanned = 0;
        src.advance(consumed);
        FrameError::Corrupt {
            reason,
            bytes_received,
        }
    }
}

impl Decoder for MllpFrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.in_frame {
            let Some(start) = scanner::find_start(src, src.len()) else {
                if !src.is_empty() {
                    debug!(
                        "discarding out-of-band bytes: count={}, bytes={}",
                        src.len(),
                        PrintFriendly(&src[..])
                    );
                    metrics::add_out_of_band_bytes(src.len());
                    src.clear();
                }
                return Ok(None);
            };
            if start > 0 {
                debug!(
                    "discarding out-of-band bytes: count={start}, bytes={}",
                    PrintFriendly(&src[..start])
                );
                metrics::add_out_of_band_bytes(start);
            }
            src.advance(start + 1);
            self.in_frame = true;
            self.scanned = 0;
        }

        let from = self.scanned.saturating_sub(1).min(src.len());
        let end = scanner::find_end_of_block(&src[from..], src.len() - from).map(|i| from + i);
        let limit = end.unwrap_or(src.len());
        if let Some(pos) = scanner::find_start(&src[from..limit], limit - from) {
            let at = from + pos;
            return Err(self.abandon(src, at, at, CorruptFrameReason::UnexpectedStartOfBlock));
        }
        if let Some(max) = self.max_payload_size.filter(|&max| limit > max) {
            return Err(self.abandon(src, limit, limit, CorruptFrameReason::Oversized { max }));
        }
        let Some(end) = end else {
            self.scanned = src.len();
            return Ok(None);
        };

        let terminator_len = match src.get(end + 1) {
            Some(&END_OF_DATA) => 2,
            None if self.require_end_of_data => {
                self.scanned = end + 1;
                return Ok(None);
            }
            Some(_) if self.require_end_of_data => {
                return Err(self.abandon(
                    src,
                    end,
                    end + 1,
                    CorruptFrameReason::MalformedTerminator,
                ));
            }
            _ => 1,
        };
        let payload = src.split_to(end).freeze();
        src.advance(terminator_len);
        self.in_frame = false;
        self.scanned = 0;
        Ok(Some(payload))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.in_frame {
            let bytes_received = src.len();
            self.in_frame = false;
            self.scanned = 0;
            src.clear();
            return Err(FrameError::Eof { bytes_received });
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for MllpFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&[u8]>::encode(self, item.as_ref(), dst)
    }
}

impl<'a> Encoder<&'a [u8]> for MllpFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if let Some(max) = self.max_payload_size.filter(|&max| item.len() > max) {
            return Err(FrameError::Oversized {
                size: item.len(),
                max,
            });
        }
        envelope_into(item, dst);
        Ok(())
    }
}

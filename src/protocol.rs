//! Protocol constants for the MLLP envelope and the HL7 payloads it carries.
//!
//! A frame on the wire is `START_OF_BLOCK`, the payload, then the
//! `END_OF_BLOCK`/`END_OF_DATA` pair. The payload may contain `END_OF_DATA`
//! on its own but never `START_OF_BLOCK` or `END_OF_BLOCK`.

use std::time::Duration;

/// Marker opening every frame (`<VT>`).
pub const START_OF_BLOCK: u8 = 0x0B;
/// First byte of the frame terminator (`<FS>`).
pub const END_OF_BLOCK: u8 = 0x1C;
/// Second byte of the frame terminator (`<GS>`).
pub const END_OF_DATA: u8 = 0x1D;

/// HL7 segment delimiter (`<CR>`).
pub const SEGMENT_DELIMITER: u8 = 0x0D;
/// HL7 message terminator (`<LF>`).
pub const MESSAGE_TERMINATOR: u8 = 0x0A;

/// Number of framing bytes added around every payload.
pub const ENVELOPE_OVERHEAD: usize = 3;

/// Buffer size used when the transport cannot report a size hint.
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Default socket send/receive buffer size requested on new sockets.
pub const DEFAULT_SOCKET_BUFFER_SIZE: u32 = 8192;

/// Time allowed to find the start of a frame.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Time allowed for the remainder of a frame once it has started.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5_000);
/// Time allowed to establish an outbound connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Write `payload` wrapped in an MLLP envelope into `dst`.
pub fn envelope_into(payload: &[u8], dst: &mut bytes::BytesMut) {
    dst.reserve(payload.len() + ENVELOPE_OVERHEAD);
    dst.extend_from_slice(&[START_OF_BLOCK]);
    dst.extend_from_slice(payload);
    dst.extend_from_slice(&[END_OF_BLOCK, END_OF_DATA]);
}

/// Return `payload` wrapped in an MLLP envelope.
///
/// # Examples
///
/// ```
/// use mllp::protocol::{END_OF_BLOCK, END_OF_DATA, START_OF_BLOCK, envelope};
///
/// let framed = envelope(b"MSH");
/// assert_eq!(framed, [START_OF_BLOCK, b'M', b'S', b'H', END_OF_BLOCK, END_OF_DATA]);
/// ```
#[must_use]
pub fn envelope(payload: &[u8]) -> Vec<u8> {
    let mut dst = bytes::BytesMut::with_capacity(payload.len() + ENVELOPE_OVERHEAD);
    envelope_into(payload, &mut dst);
    dst.to_vec()
}

//! Byte-search helpers locating MLLP envelope markers.
//!
//! Every function takes the buffer and the number of valid bytes in it; the
//! search is bounded by `min(length, buffer.len())` so callers can pass a
//! reusable read buffer together with the count returned by the last read.
//! None of the helpers allocate or fail.

use crate::protocol::{END_OF_BLOCK, END_OF_DATA, START_OF_BLOCK};

fn valid(buffer: &[u8], length: usize) -> &[u8] { &buffer[..length.min(buffer.len())] }

/// Return the index of the first `START_OF_BLOCK` byte.
///
/// # Examples
///
/// ```
/// use mllp::scanner::find_start;
///
/// assert_eq!(find_start(b"noise\x0bMSH", 9), Some(5));
/// assert_eq!(find_start(b"noise\x0bMSH", 5), None);
/// ```
#[must_use]
pub fn find_start(buffer: &[u8], length: usize) -> Option<usize> {
    valid(buffer, length)
        .iter()
        .position(|&b| b == START_OF_BLOCK)
}

/// Return the index of the `END_OF_BLOCK` byte of the last
/// `END_OF_BLOCK, END_OF_DATA` pair.
///
/// The scan runs backwards so bytes trailing the real terminator are
/// tolerated, and stray `END_OF_DATA` bytes inside the payload are never
/// mistaken for the end of the frame.
///
/// # Examples
///
/// ```
/// use mllp::scanner::find_end;
///
/// let buf = b"\x0bA\x1dB\x1c\x1dnoise";
/// assert_eq!(find_end(buf, buf.len()), Some(4));
/// ```
#[must_use]
pub fn find_end(buffer: &[u8], length: usize) -> Option<usize> {
    let data = valid(buffer, length);
    (1..data.len())
        .rev()
        .find(|&i| data[i] == END_OF_DATA && data[i - 1] == END_OF_BLOCK)
        .map(|i| i - 1)
}

/// Return the index of the first `END_OF_BLOCK` byte, whatever follows it.
#[must_use]
pub fn find_end_of_block(buffer: &[u8], length: usize) -> Option<usize> {
    valid(buffer, length)
        .iter()
        .position(|&b| b == END_OF_BLOCK)
}

/// Return the index of the first `END_OF_BLOCK` that is followed by a byte
/// other than `END_OF_DATA`.
///
/// An `END_OF_BLOCK` in the last valid position is not reported: its
/// companion byte may still be in flight.
#[must_use]
pub fn find_malformed_end(buffer: &[u8], length: usize) -> Option<usize> {
    valid(buffer, length)
        .windows(2)
        .position(|pair| pair[0] == END_OF_BLOCK && pair[1] != END_OF_DATA)
}

/// Return `true` when `buffer` holds a start marker followed later by a
/// complete terminator pair.
#[must_use]
pub fn has_complete_envelope(buffer: &[u8]) -> bool {
    match (
        find_start(buffer, buffer.len()),
        find_end(buffer, buffer.len()),
    ) {
        (Some(start), Some(end)) => start < end,
        _ => false,
    }
}

//! Minimal HL7 v2 inspection used by the framing layer.
//!
//! Nothing here parses HL7 into a message model. The helpers look at raw
//! bytes: validating that a payload is something the envelope can carry,
//! rendering control characters for logs, extracting a handful of MSH
//! fields, and building or classifying acknowledgements.

mod ack;
mod inspect;
mod printable;

use thiserror::Error;

pub use ack::{
    AcknowledgementCode,
    find_acknowledgement_code,
    generate_acknowledgement,
    process_acknowledgement,
};
pub use inspect::{MshFields, find_msh18, invalid_payload_message, is_valid_payload};
pub use printable::{PrintFriendly, print_friendly, print_friendly_range};

/// Errors raised while extracting data from an HL7 message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Hl7Error {
    /// The message contained no bytes.
    #[error("message is empty")]
    EmptyMessage,
    /// The message does not open with an MSH segment.
    #[error("message does not start with an MSH segment")]
    MissingMsh,
    /// The MSH segment has too few fields.
    #[error("MSH segment has {found} field separators; at least 10 are required")]
    InsufficientFields {
        /// Number of field separators located.
        found: usize,
    },
}

/// Collect the byte offsets of the MSH field boundaries.
///
/// The first entry is MSH-1 itself (offset 3). When the segment does not end
/// with a field separator, its end offset (the `<CR>` or the end of the
/// message) is appended as a virtual boundary so the final field is
/// addressable. Returns the boundaries and the offset where the segment ends.
pub(crate) fn msh_boundaries(message: &[u8]) -> Option<(Vec<usize>, usize)> {
    if message.len() < 4 || !message.starts_with(b"MSH") {
        return None;
    }
    let separator = message[3];
    let end = message
        .iter()
        .position(|&b| b == crate::protocol::SEGMENT_DELIMITER)
        .unwrap_or(message.len());
    let mut boundaries: Vec<usize> = (3..end).filter(|&i| message[i] == separator).collect();
    if message[end - 1] != separator {
        boundaries.push(end);
    }
    Some((boundaries, end))
}

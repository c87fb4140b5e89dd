//! Log-safe rendering of payload bytes.

use std::fmt;

use crate::protocol::{
    END_OF_BLOCK,
    END_OF_DATA,
    MESSAGE_TERMINATOR,
    SEGMENT_DELIMITER,
    START_OF_BLOCK,
};

const TAB: u8 = 0x09;

fn token(byte: u8) -> Option<&'static str> {
    match byte {
        START_OF_BLOCK => Some("<0x0B VT>"),
        END_OF_BLOCK => Some("<0x1C FS>"),
        END_OF_DATA => Some("<0x1D GS>"),
        SEGMENT_DELIMITER => Some("<0x0D CR>"),
        MESSAGE_TERMINATOR => Some("<0x0A LF>"),
        TAB => Some("<0x09 TAB>"),
        _ => None,
    }
}

/// [`fmt::Display`] adapter that renders MLLP and HL7 control bytes as
/// readable tokens.
///
/// An empty slice renders as `<>`.
///
/// # Examples
///
/// ```
/// use mllp::hl7::PrintFriendly;
///
/// assert_eq!(PrintFriendly(b"\x0bMSH\r\x1c\x1d").to_string(), "<0x0B VT>MSH<0x0D CR><0x1C FS><0x1D GS>");
/// assert_eq!(PrintFriendly(b"").to_string(), "<>");
/// ```
#[derive(Clone, Copy, Debug)]
pub struct PrintFriendly<'a>(pub &'a [u8]);

impl fmt::Display for PrintFriendly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<>");
        }
        for &byte in self.0 {
            match token(byte) {
                Some(t) => f.write_str(t)?,
                None => write!(f, "{}", char::from(byte))?,
            }
        }
        Ok(())
    }
}

/// Render the whole of `bytes`.
#[must_use]
pub fn print_friendly(bytes: &[u8]) -> String { PrintFriendly(bytes).to_string() }

/// Render `bytes[start..end]`, clamping `end` to the slice length.
///
/// An empty or inverted range renders as an empty string, not `<>`, so the
/// caller can tell "nothing selected" from "selected nothing".
#[must_use]
pub fn print_friendly_range(bytes: &[u8], start: usize, end: usize) -> String {
    let end = end.min(bytes.len());
    if start >= end {
        return String::new();
    }
    print_friendly(&bytes[start..end])
}

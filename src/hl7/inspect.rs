//! Payload validation and MSH field extraction.

use log::{debug, warn};

use super::msh_boundaries;
use crate::protocol::{END_OF_BLOCK, MESSAGE_TERMINATOR, SEGMENT_DELIMITER, START_OF_BLOCK};

/// Describe why `payload[..length]` cannot be carried as an HL7 message.
///
/// Returns `None` when the payload is acceptable. Checks run in order: the
/// payload must be non-empty, open with `MSH`, end with `<CR>` or
/// `<CR><LF>`, and contain no `START_OF_BLOCK` or `END_OF_BLOCK` bytes.
///
/// # Examples
///
/// ```
/// use mllp::hl7::invalid_payload_message;
///
/// let msg = b"MSH|^~\\&|APP\r";
/// assert_eq!(invalid_payload_message(msg, msg.len()), None);
/// assert_eq!(
///     invalid_payload_message(b"", 0).as_deref(),
///     Some("HL7 payload is empty")
/// );
/// ```
#[must_use]
pub fn invalid_payload_message(payload: &[u8], length: usize) -> Option<String> {
    if payload.is_empty() || length == 0 {
        return Some("HL7 payload is empty".to_owned());
    }
    if length > payload.len() {
        warn!(
            "validation length exceeds payload: length={length}, payload_len={}",
            payload.len()
        );
    } else if length < payload.len() {
        debug!(
            "validating payload prefix: length={length}, payload_len={}",
            payload.len()
        );
    }

    if !payload.starts_with(b"MSH") {
        let head = &payload[..payload.len().min(3)];
        return Some(format!(
            "The first segment of the HL7 payload {{{}}} is not an MSH segment",
            String::from_utf8_lossy(head)
        ));
    }

    let data = &payload[..length.min(payload.len())];
    if let Some(problem) = terminator_problem(data) {
        return Some(problem);
    }

    data.iter().enumerate().find_map(|(i, &b)| match b {
        START_OF_BLOCK => Some(format!(
            "HL7 payload contains an embedded START_OF_BLOCK {{{START_OF_BLOCK:#x}, ASCII <VT>}} \
             at index {i}"
        )),
        END_OF_BLOCK => Some(format!(
            "HL7 payload contains an embedded END_OF_BLOCK {{{END_OF_BLOCK:#x}, ASCII <FS>}} at \
             index {i}"
        )),
        _ => None,
    })
}

fn terminator_problem(data: &[u8]) -> Option<String> {
    match data {
        [.., SEGMENT_DELIMITER] | [.., SEGMENT_DELIMITER, MESSAGE_TERMINATOR] => None,
        [.., prev, MESSAGE_TERMINATOR] => Some(format!(
            "The HL7 payload terminating bytes [{prev:#x}, {MESSAGE_TERMINATOR:#x}] are \
             incorrect - expected [{SEGMENT_DELIMITER:#x}, {MESSAGE_TERMINATOR:#x}]  {{ASCII \
             [<CR>, <LF>]}}"
        )),
        [.., last] => Some(format!(
            "The HL7 payload terminating byte [{last:#x}] is incorrect - expected \
             [{SEGMENT_DELIMITER:#x}]  {{ASCII [<CR>]}}"
        )),
        [] => Some("HL7 payload is empty".to_owned()),
    }
}

/// Shorthand for `invalid_payload_message(payload, payload.len()).is_none()`.
#[must_use]
pub fn is_valid_payload(payload: &[u8]) -> bool {
    invalid_payload_message(payload, payload.len()).is_none()
}

/// Return MSH-18 (character set) of `message`.
///
/// `Some("")` means the field is present but empty; `None` means the MSH
/// segment stops before field 18.
///
/// # Examples
///
/// ```
/// use mllp::hl7::find_msh18;
///
/// let msg = b"MSH|^~\\&|A|B|C|D|20240101||ADT^A01|1|P|2.5||||||UNICODE UTF-8\rPID|1\r";
/// assert_eq!(find_msh18(msg), Some("UNICODE UTF-8".to_owned()));
/// ```
#[must_use]
pub fn find_msh18(message: &[u8]) -> Option<String> {
    let (boundaries, _) = msh_boundaries(message)?;
    match boundaries.len() {
        n if n > 17 => Some(field(message, boundaries[16], boundaries[17])),
        17 => Some(String::new()),
        _ => None,
    }
}

fn field(message: &[u8], from: usize, to: usize) -> String {
    if to <= from + 1 {
        return String::new();
    }
    String::from_utf8_lossy(&message[from + 1..to]).into_owned()
}

/// Selected MSH header fields, used to annotate logs and exchange metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MshFields {
    /// MSH-3.
    pub sending_application: Option<String>,
    /// MSH-4.
    pub sending_facility: Option<String>,
    /// MSH-5.
    pub receiving_application: Option<String>,
    /// MSH-6.
    pub receiving_facility: Option<String>,
    /// MSH-7.
    pub timestamp: Option<String>,
    /// MSH-8.
    pub security: Option<String>,
    /// MSH-9 as a whole.
    pub message_type: Option<String>,
    /// First component of MSH-9.
    pub event_type: Option<String>,
    /// Second component of MSH-9.
    pub trigger_event: Option<String>,
    /// MSH-10.
    pub control_id: Option<String>,
    /// MSH-11.
    pub processing_id: Option<String>,
    /// MSH-12.
    pub version_id: Option<String>,
    /// MSH-18.
    pub charset: Option<String>,
}

impl MshFields {
    /// Extract header fields from the MSH segment of `message`.
    ///
    /// Returns `None` when the message is shorter than eight bytes, does not
    /// start with `MSH`, or has no segment delimiter. Empty fields are left
    /// as `None`.
    #[must_use]
    pub fn parse(message: &[u8]) -> Option<Self> {
        if message.len() < 8 {
            return None;
        }
        if !message.contains(&SEGMENT_DELIMITER) {
            warn!(
                "MSH segment is not terminated: len={}",
                message.len()
            );
            return None;
        }
        let (boundaries, _) = msh_boundaries(message)?;
        let component = message[4];
        let mut fields = Self::default();
        for i in 2..boundaries.len() {
            let value = field(message, boundaries[i - 1], boundaries[i]);
            if value.is_empty() {
                continue;
            }
            match i {
                2 => fields.sending_application = Some(value),
                3 => fields.sending_facility = Some(value),
                4 => fields.receiving_application = Some(value),
                5 => fields.receiving_facility = Some(value),
                6 => fields.timestamp = Some(value),
                7 => fields.security = Some(value),
                8 => {
                    let mut parts = value.splitn(3, char::from(component));
                    fields.event_type = parts.next().map(str::to_owned);
                    fields.trigger_event = parts.next().filter(|s| !s.is_empty()).map(str::to_owned);
                    fields.message_type = Some(value);
                }
                9 => fields.control_id = Some(value),
                10 => fields.processing_id = Some(value),
                11 => fields.version_id = Some(value),
                17 => fields.charset = Some(value),
                _ => {}
            }
        }
        Some(fields)
    }
}

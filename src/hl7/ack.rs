//! HL7 acknowledgement codes, synthesis and classification.

use std::{fmt, str::FromStr};

use bytes::{BufMut, Bytes, BytesMut};
use log::warn;

use super::{Hl7Error, msh_boundaries};
use crate::{error::MllpError, protocol::SEGMENT_DELIMITER};

/// MSA-1 acknowledgement codes, original and enhanced mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcknowledgementCode {
    /// Application accept.
    AA,
    /// Application error.
    AE,
    /// Application reject.
    AR,
    /// Commit accept.
    CA,
    /// Commit error.
    CE,
    /// Commit reject.
    CR,
}

impl AcknowledgementCode {
    /// The two-letter wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AA => "AA",
            Self::AE => "AE",
            Self::AR => "AR",
            Self::CA => "CA",
            Self::CE => "CE",
            Self::CR => "CR",
        }
    }

    /// Parse the first two bytes of an MSA-1 value.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [b'A', b'A', ..] => Some(Self::AA),
            [b'A', b'E', ..] => Some(Self::AE),
            [b'A', b'R', ..] => Some(Self::AR),
            [b'C', b'A', ..] => Some(Self::CA),
            [b'C', b'E', ..] => Some(Self::CE),
            [b'C', b'R', ..] => Some(Self::CR),
            _ => None,
        }
    }

    /// `true` for `AA` and `CA`.
    #[must_use]
    pub const fn is_accept(self) -> bool { matches!(self, Self::AA | Self::CA) }

    /// `true` for `AE` and `CE`.
    #[must_use]
    pub const fn is_error(self) -> bool { matches!(self, Self::AE | Self::CE) }

    /// `true` for `AR` and `CR`.
    #[must_use]
    pub const fn is_reject(self) -> bool { matches!(self, Self::AR | Self::CR) }
}

impl fmt::Display for AcknowledgementCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for AcknowledgementCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 {
            return Err(format!("unsupported acknowledgement code: {s}"));
        }
        Self::from_bytes(s.as_bytes()).ok_or_else(|| format!("unsupported acknowledgement code: {s}"))
    }
}

/// Build an acknowledgement for `message` carrying `code` in MSA-1.
///
/// The ACK's MSH swaps sender and receiver, stamps MSH-7 with the current
/// local time, sets MSH-9 to `ACK` plus the original trigger event, appends
/// `A` to the original control id, and copies MSH-11 onward unchanged. MSA-2
/// echoes the original control id; `text` becomes MSA-3 when present.
///
/// # Errors
///
/// Returns [`Hl7Error`] when the message is empty, does not start with an
/// MSH segment, or its MSH has fewer than ten field separators.
pub fn generate_acknowledgement(
    message: &[u8],
    code: AcknowledgementCode,
    text: Option<&str>,
) -> Result<Bytes, Hl7Error> {
    if message.is_empty() {
        return Err(Hl7Error::EmptyMessage);
    }
    let (b, msh_end) = msh_boundaries(message).ok_or(Hl7Error::MissingMsh)?;
    if b.len() < 10 {
        return Err(Hl7Error::InsufficientFields { found: b.len() });
    }
    let separator = message[3];
    let component = message[4];

    let mut ack = BytesMut::with_capacity(msh_end + 64);
    ack.put_slice(&message[..b[1]]);
    // MSH-5 and MSH-6 become the sender, MSH-3 and MSH-4 the receiver.
    ack.put_slice(&message[b[3]..b[5]]);
    ack.put_slice(&message[b[1]..b[3]]);

    ack.put_u8(separator);
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%.3f%z").to_string();
    ack.put_slice(stamp.as_bytes());
    ack.put_u8(separator);

    ack.put_u8(separator);
    ack.put_slice(b"ACK");
    let message_type = &message[b[7] + 1..b[8]];
    if let Some(pos) = message_type.iter().position(|&c| c == component) {
        ack.put_slice(&message_type[pos..]);
    }

    let control_id = &message[b[8] + 1..b[9]];
    ack.put_u8(separator);
    ack.put_slice(control_id);
    if !control_id.is_empty() {
        ack.put_u8(b'A');
    }
    ack.put_slice(&message[b[9]..msh_end]);
    ack.put_u8(SEGMENT_DELIMITER);

    ack.put_slice(b"MSA");
    ack.put_u8(separator);
    ack.put_slice(code.as_str().as_bytes());
    ack.put_u8(separator);
    ack.put_slice(control_id);
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        ack.put_u8(separator);
        ack.put_slice(text.as_bytes());
    }
    ack.put_u8(SEGMENT_DELIMITER);
    Ok(ack.freeze())
}

/// Locate the MSA-1 value in `acknowledgement`.
fn msa1(acknowledgement: &[u8]) -> Option<&[u8]> {
    let separator = match acknowledgement {
        [b'M', b'S', b'H', sep, ..] => *sep,
        _ => b'|',
    };
    let is_msa = |at: usize| {
        acknowledgement.len() > at + 3
            && &acknowledgement[at..at + 3] == b"MSA"
            && acknowledgement[at + 3] == separator
    };
    let start = if is_msa(0) {
        0
    } else {
        acknowledgement
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == SEGMENT_DELIMITER)
            .map(|(i, _)| i + 1)
            .find(|&i| is_msa(i))?
    };
    let value = &acknowledgement[start + 4..];
    let len = value
        .iter()
        .position(|&b| b == separator || b == SEGMENT_DELIMITER)
        .unwrap_or(value.len());
    Some(&value[..len])
}

/// Return the raw MSA-1 value of `acknowledgement`, or `None` when the
/// acknowledgement has no MSA segment.
///
/// # Examples
///
/// ```
/// use mllp::hl7::find_acknowledgement_code;
///
/// let ack = b"MSH|^~\\&|A|B|C|D|20240101||ACK^A01|1A|P|2.5\rMSA|AE|1\r";
/// assert_eq!(find_acknowledgement_code(ack), Some(&b"AE"[..]));
/// ```
#[must_use]
pub fn find_acknowledgement_code(acknowledgement: &[u8]) -> Option<&[u8]> { msa1(acknowledgement) }

/// Classify a received acknowledgement of `message`.
///
/// `AA` and `CA` yield the code. `AE`, `AR`, `CE` and `CR` yield
/// [`MllpError::NegativeAcknowledgement`]. An acknowledgement without an MSA
/// segment is accepted as `Ok(None)` unless `require_msa` is set.
///
/// # Errors
///
/// Returns [`MllpError::InvalidAcknowledgement`] for a missing MSA segment
/// (when required) or an unsupported MSA-1 value, and
/// [`MllpError::NegativeAcknowledgement`] for error and reject codes.
pub fn process_acknowledgement(
    message: &Bytes,
    acknowledgement: &Bytes,
    require_msa: bool,
) -> Result<Option<AcknowledgementCode>, MllpError> {
    let invalid = |text: String| MllpError::InvalidAcknowledgement {
        message: text,
        payload: message.clone(),
        acknowledgement: Some(acknowledgement.clone()),
    };

    let Some(raw) = msa1(acknowledgement) else {
        return if require_msa {
            Err(invalid("MSA Not found in acknowledgement".to_owned()))
        } else {
            Ok(None)
        };
    };
    if raw.len() > 2 {
        warn!(
            "MSA-1 is longer than two bytes; ignoring trailing bytes: msa1={}",
            String::from_utf8_lossy(raw)
        );
    }
    match AcknowledgementCode::from_bytes(raw) {
        Some(code) if code.is_accept() => Ok(Some(code)),
        Some(code) => Err(MllpError::NegativeAcknowledgement {
            code,
            payload: message.clone(),
            acknowledgement: acknowledgement.clone(),
        }),
        None => Err(invalid(format!(
            "unsupported acknowledgement type: '{}'",
            String::from_utf8_lossy(raw)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::hl7::test_message::TEST_MESSAGE;

    fn msg() -> &'static [u8] { TEST_MESSAGE.as_bytes() }

    fn ack_with(code: &str) -> Bytes {
        Bytes::from(format!(
            "MSH|^~\\&|INHOUSE|RTH00|REQUESTING|ICE|20161206193919.000+0000||ACK^O01|00001A|D|2.3|||||||\rMSA|{code}|00001\r"
        ))
    }

    fn strip_timestamp(ack: &[u8]) -> String {
        let text = String::from_utf8_lossy(ack).into_owned();
        let fields: Vec<&str> = text.splitn(8, '|').collect();
        format!(
            "{}|{}|{}|{}|{}|{}|<ts>|{}",
            fields[0], fields[1], fields[2], fields[3], fields[4], fields[5], fields[7]
        )
    }

    #[test]
    fn generated_acknowledgement_swaps_parties_and_echoes_control_id() {
        let ack = generate_acknowledgement(msg(), AcknowledgementCode::AA, None).expect("ack");
        assert_eq!(
            strip_timestamp(&ack),
            "MSH|^~\\&|INHOUSE|RTH00|REQUESTING|ICE|<ts>||ACK^O01|00001A|D|2.3|||||||\rMSA|AA|00001\r"
        );
    }

    #[test]
    fn generated_acknowledgement_carries_msa_text() {
        let ack = generate_acknowledgement(msg(), AcknowledgementCode::AE, Some("bad PID"))
            .expect("ack");
        assert!(ack.ends_with(b"\rMSA|AE|00001|bad PID\r"));
    }

    #[test]
    fn timestamp_has_millisecond_precision() {
        let ack = generate_acknowledgement(msg(), AcknowledgementCode::AA, None).expect("ack");
        let text = String::from_utf8_lossy(&ack).into_owned();
        let stamp = text.split('|').nth(6).expect("MSH-7");
        assert_eq!(stamp.find('.'), Some(14));
        assert_eq!(stamp.len(), 23);
    }

    #[test]
    fn message_without_segment_delimiter_is_acknowledged() {
        let ack = generate_acknowledgement(
            b"MSH|^~\\&|A|B|C|D|20240101||ADT|7|P",
            AcknowledgementCode::CA,
            None,
        )
        .expect("ack");
        let text = strip_timestamp(&ack);
        assert_eq!(text, "MSH|^~\\&|C|D|A|B|<ts>||ACK|7A|P\rMSA|CA|7\r");
    }

    #[rstest]
    #[case::empty(b"".as_slice(), Hl7Error::EmptyMessage)]
    #[case::not_msh(b"PID|1|2|3\r".as_slice(), Hl7Error::MissingMsh)]
    #[case::short(b"MSH|^~\\&|A|B|C\r".as_slice(), Hl7Error::InsufficientFields { found: 5 })]
    fn generation_failures(#[case] message: &[u8], #[case] expected: Hl7Error) {
        assert_eq!(
            generate_acknowledgement(message, AcknowledgementCode::AA, None),
            Err(expected)
        );
    }

    #[rstest]
    #[case::aa("AA", Some(&b"AA"[..]))]
    #[case::long("AAX", Some(&b"AAX"[..]))]
    fn msa1_lookup(#[case] code: &str, #[case] expected: Option<&[u8]>) {
        assert_eq!(find_acknowledgement_code(&ack_with(code)), expected);
    }

    #[test]
    fn msa1_absent() {
        assert_eq!(find_acknowledgement_code(msg()), None);
    }

    #[rstest]
    #[case::aa("AA", AcknowledgementCode::AA)]
    #[case::ca("CA", AcknowledgementCode::CA)]
    fn accepting_codes_succeed(#[case] code: &str, #[case] expected: AcknowledgementCode) {
        let message = Bytes::from_static(msg());
        let result = process_acknowledgement(&message, &ack_with(code), true).expect("accepted");
        assert_eq!(result, Some(expected));
    }

    #[rstest]
    #[case::ae("AE", AcknowledgementCode::AE)]
    #[case::ar("AR", AcknowledgementCode::AR)]
    #[case::ce("CE", AcknowledgementCode::CE)]
    #[case::cr("CR", AcknowledgementCode::CR)]
    fn negative_codes_are_errors(#[case] code: &str, #[case] expected: AcknowledgementCode) {
        let message = Bytes::from_static(msg());
        let err = process_acknowledgement(&message, &ack_with(code), true).expect_err("negative");
        match err {
            MllpError::NegativeAcknowledgement { code, .. } => assert_eq!(code, expected),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unsupported_code_is_invalid() {
        let message = Bytes::from_static(msg());
        let err = process_acknowledgement(&message, &ack_with("ZZ"), true).expect_err("invalid");
        assert_eq!(
            err.to_string(),
            "invalid acknowledgement: unsupported acknowledgement type: 'ZZ'"
        );
    }

    #[test]
    fn missing_msa_respects_requirement() {
        let message = Bytes::from_static(msg());
        let no_msa = Bytes::from_static(b"MSH|^~\\&|A|B|C|D|1||ACK|1A|P\r");
        assert!(matches!(
            process_acknowledgement(&message, &no_msa, true),
            Err(MllpError::InvalidAcknowledgement { .. })
        ));
        assert_eq!(
            process_acknowledgement(&message, &no_msa, false).expect("lenient"),
            None
        );
    }

    #[rstest]
    #[case::valid("CE", Ok(AcknowledgementCode::CE))]
    #[case::wrong_length("A", Err(()))]
    #[case::unknown("XX", Err(()))]
    fn code_from_str(#[case] input: &str, #[case] expected: Result<AcknowledgementCode, ()>) {
        assert_eq!(input.parse::<AcknowledgementCode>().map_err(|_| ()), expected);
    }
}

//! Error taxonomy for the MLLP framing layer.
//!
//! A single tagged enum replaces parallel message/acknowledgement hierarchies:
//! framing variants carry the [`Role`] of the reader or writer that raised
//! them together with whatever bytes had been collected, so diagnostics never
//! lose the partial payload.
//!
//! # Reset policy
//!
//! Every variant for which [`MllpError::requires_reset`] returns `true` has
//! already forced a connection reset by the time the caller sees it when it
//! was raised by the reader. Writer failures leave the connection to the
//! caller, which must treat it as unusable.

use std::{fmt, io};

use bytes::Bytes;
use thiserror::Error;

use crate::hl7::{AcknowledgementCode, Hl7Error};

/// Which side of an exchange a reader or writer serves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Role {
    /// Carries HL7 messages.
    #[default]
    Message,
    /// Carries acknowledgements of previously exchanged messages.
    Acknowledgement,
}

impl Role {
    /// Lower-case label used in log lines and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Acknowledgement => "acknowledgement",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Why a frame was rejected as corrupt.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CorruptFrameReason {
    /// A start marker arrived before the current frame was terminated.
    #[error("START_OF_BLOCK received before the frame was terminated")]
    UnexpectedStartOfBlock,
    /// `END_OF_BLOCK` was followed by something other than `END_OF_DATA`.
    #[error("END_OF_BLOCK not followed by END_OF_DATA")]
    MalformedTerminator,
    /// The payload grew beyond the configured maximum.
    #[error("payload exceeds maximum size of {max} bytes")]
    Oversized {
        /// Configured maximum payload size.
        max: usize,
    },
}

/// Errors raised by the MLLP reader, writer and acknowledgement handling.
#[derive(Debug, Error)]
pub enum MllpError {
    /// The connection was never established.
    #[error("{role} connection is not connected")]
    NotConnected {
        /// Role of the operation that was attempted.
        role: Role,
    },

    /// An outbound connection could not be established.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Address that was dialled.
        address: String,
        /// Underlying transport failure.
        #[source]
        source: io::Error,
    },

    /// The connection has already been closed or reset.
    #[error("{role} connection is closed")]
    ConnectionClosed {
        /// Role of the operation that was attempted.
        role: Role,
    },

    /// A frame was started but not completed within the read timeout.
    #[error("timeout receiving {role} frame: {} payload bytes received", .partial.len())]
    Timeout {
        /// Role of the reader.
        role: Role,
        /// Payload bytes received before the timeout.
        partial: Bytes,
    },

    /// The byte stream violated the framing rules.
    #[error("corrupt {role} frame: {reason}")]
    CorruptFrame {
        /// Role of the reader.
        role: Role,
        /// Which framing rule was broken.
        reason: CorruptFrameReason,
        /// Payload bytes received before the violation.
        partial: Bytes,
    },

    /// The peer closed the stream.
    #[error("end of stream while receiving {role}: {} payload bytes received", .partial.len())]
    EndOfStream {
        /// Role of the reader.
        role: Role,
        /// Payload bytes received before the stream ended.
        partial: Bytes,
    },

    /// Reading from the transport failed.
    #[error("failed to receive {role}: {source}")]
    Receive {
        /// Role of the reader.
        role: Role,
        /// Underlying transport failure.
        #[source]
        source: io::Error,
        /// Payload bytes received before the failure.
        partial: Bytes,
    },

    /// Writing to the transport failed.
    #[error("failed to write {role}: {source}")]
    Write {
        /// Role of the writer.
        role: Role,
        /// Underlying transport failure.
        #[source]
        source: io::Error,
        /// Payload that was being written.
        payload: Bytes,
    },

    /// A received or outgoing HL7 message failed validation.
    #[error("invalid message: {message}")]
    InvalidMessage {
        /// Description of the problem.
        message: String,
        /// The offending payload.
        payload: Bytes,
    },

    /// An acknowledgement was missing, malformed or of an unsupported type.
    #[error("invalid acknowledgement: {message}")]
    InvalidAcknowledgement {
        /// Description of the problem.
        message: String,
        /// The message being acknowledged.
        payload: Bytes,
        /// The acknowledgement, when one was available.
        acknowledgement: Option<Bytes>,
    },

    /// An acknowledgement could not be synthesised from the message.
    #[error("failed to generate acknowledgement: {0}")]
    AcknowledgementGeneration(#[from] Hl7Error),

    /// The peer answered with an error or reject acknowledgement.
    #[error("negative acknowledgement received: {code}")]
    NegativeAcknowledgement {
        /// Acknowledgement code found in MSA-1.
        code: AcknowledgementCode,
        /// The message that was rejected.
        payload: Bytes,
        /// The acknowledgement as received.
        acknowledgement: Bytes,
    },
}

impl MllpError {
    /// Role of the reader or writer that raised the error, if any.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::NotConnected { role }
            | Self::ConnectionClosed { role }
            | Self::Timeout { role, .. }
            | Self::CorruptFrame { role, .. }
            | Self::EndOfStream { role, .. }
            | Self::Receive { role, .. }
            | Self::Write { role, .. } => Some(*role),
            Self::Connect { .. }
            | Self::InvalidMessage { .. }
            | Self::InvalidAcknowledgement { .. }
            | Self::AcknowledgementGeneration(_)
            | Self::NegativeAcknowledgement { .. } => None,
        }
    }

    /// Bytes collected before a receive failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use mllp::{MllpError, Role};
    ///
    /// let err = MllpError::Timeout {
    ///     role: Role::Message,
    ///     partial: Bytes::from_static(b"MSH|"),
    /// };
    /// assert_eq!(err.partial_payload(), Some(&b"MSH|"[..]));
    /// ```
    #[must_use]
    pub fn partial_payload(&self) -> Option<&[u8]> {
        match self {
            Self::Timeout { partial, .. }
            | Self::CorruptFrame { partial, .. }
            | Self::EndOfStream { partial, .. }
            | Self::Receive { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }

    /// Returns `true` when the byte boundary on the connection is lost and
    /// the connection must be reset rather than reused.
    #[must_use]
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::CorruptFrame { .. }
                | Self::EndOfStream { .. }
                | Self::Receive { .. }
                | Self::Write { .. }
        )
    }

    /// Returns `true` for a mid-frame timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool { matches!(self, Self::Timeout { .. }) }

    /// Short category label for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } | Self::ConnectionClosed { .. } => "connection",
            Self::Connect { .. } => "connect",
            Self::Timeout { .. } => "timeout",
            Self::CorruptFrame { .. } => "corrupt_frame",
            Self::EndOfStream { .. } => "eof",
            Self::Receive { .. } => "receive",
            Self::Write { .. } => "write",
            Self::InvalidMessage { .. } => "invalid_message",
            Self::InvalidAcknowledgement { .. } | Self::AcknowledgementGeneration(_) => {
                "invalid_acknowledgement"
            }
            Self::NegativeAcknowledgement { .. } => "negative_acknowledgement",
        }
    }
}

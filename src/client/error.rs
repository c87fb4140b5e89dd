//! Error types for MLLP client operations.

use crate::error::MllpError;

/// Errors emitted by [`MllpClient`](super::MllpClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting, framing or acknowledgement handling failed.
    #[error(transparent)]
    Mllp(#[from] MllpError),
    /// An operation still failed after reconnecting.
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: MllpError,
    },
}

impl ClientError {
    /// The underlying MLLP error.
    #[must_use]
    pub fn mllp(&self) -> &MllpError {
        match self {
            Self::Mllp(err) | Self::RetriesExhausted { last: err, .. } => err,
        }
    }
}

//! User-supplied message processing.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    ack::ConnectionDirective,
    hl7::{AcknowledgementCode, MshFields},
};

/// Error type returned by handlers. Its text becomes MSA-3 of a synthesised
/// error acknowledgement.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message received by the server.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    /// Payload with framing removed.
    pub payload: Bytes,
    /// Parsed MSH fields, when header extraction is enabled and the MSH
    /// segment could be read.
    pub headers: Option<MshFields>,
    /// Remote peer, when known.
    pub peer_addr: Option<SocketAddr>,
}

/// How a handler wants its message acknowledged.
///
/// The default lets the server synthesise an acknowledgement and keep the
/// connection open.
#[derive(Clone, Debug, Default)]
pub struct HandlerResponse {
    pub(crate) acknowledgement: Option<Bytes>,
    pub(crate) code: Option<AcknowledgementCode>,
    pub(crate) msa_text: Option<String>,
    pub(crate) directive: ConnectionDirective,
}

impl HandlerResponse {
    /// Send `ack` verbatim instead of a synthesised acknowledgement.
    #[must_use]
    pub fn acknowledgement(mut self, ack: Bytes) -> Self {
        self.acknowledgement = Some(ack);
        self
    }

    /// Acknowledgement code to synthesise.
    #[must_use]
    pub fn code(mut self, code: AcknowledgementCode) -> Self {
        self.code = Some(code);
        self
    }

    /// MSA-3 text for a synthesised acknowledgement.
    #[must_use]
    pub fn msa_text(mut self, text: impl Into<String>) -> Self {
        self.msa_text = Some(text.into());
        self
    }

    /// Connection directive applied around the acknowledgement.
    #[must_use]
    pub fn directive(mut self, directive: ConnectionDirective) -> Self {
        self.directive = directive;
        self
    }
}

/// Processes messages received by [`MllpServer`](super::MllpServer).
///
/// Closures taking a [`ReceivedMessage`] and returning
/// `Result<HandlerResponse, HandlerError>` implement this trait.
///
/// # Examples
///
/// ```
/// use mllp::server::{HandlerError, HandlerResponse, MessageHandler, ReceivedMessage};
///
/// fn accepts<H: MessageHandler>(_: H) {}
///
/// accepts(|message: &ReceivedMessage| -> Result<HandlerResponse, HandlerError> {
///     if message.payload.is_empty() {
///         return Err("empty message".into());
///     }
///     Ok(HandlerResponse::default())
/// });
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one message.
    ///
    /// # Errors
    ///
    /// A returned error is acknowledged with an application error code
    /// unless a different code was requested.
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerResponse, HandlerError>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&ReceivedMessage) -> Result<HandlerResponse, HandlerError> + Send + Sync + 'static,
{
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerResponse, HandlerError> {
        self(message)
    }
}

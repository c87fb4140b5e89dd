//! Tokio-based MLLP listener.
//!
//! [`MllpServer`] accepts TCP connections and runs one sequential task per
//! connection: read a frame, optionally validate it, hand it to a
//! [`MessageHandler`], then acknowledge it through the
//! [`AcknowledgementOrchestrator`](crate::ack::AcknowledgementOrchestrator).

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::config::MllpConfig;

mod config;
mod connection;
pub mod error;
mod handler;
mod runtime;

pub use error::ServerError;
pub use handler::{HandlerError, HandlerResponse, MessageHandler, ReceivedMessage};
/// Re-exported configuration type for accept-loop back-off.
pub use runtime::BackoffConfig;

/// MLLP listener dispatching received messages to a [`MessageHandler`].
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// or [`Bound`]. New servers start `Unbound` and must call
/// [`bind`](MllpServer::bind) or
/// [`bind_existing_listener`](MllpServer::bind_existing_listener) before
/// running.
pub struct MllpServer<H, S = Unbound>
where
    H: MessageHandler,
    S: ServerState,
{
    pub(crate) handler: Arc<H>,
    pub(crate) config: MllpConfig,
    pub(crate) workers: usize,
    pub(crate) backoff_config: BackoffConfig,
    /// Single-use readiness notification sent once all accept loops run.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

#[cfg(test)]
pub(crate) mod test_util;

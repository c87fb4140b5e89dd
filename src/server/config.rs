//! Builder and listener binding for [`MllpServer`].

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::{net::TcpListener, sync::oneshot};

use super::{BackoffConfig, Bound, MessageHandler, MllpServer, ServerError, ServerState, Unbound};
use crate::config::MllpConfig;

impl<H: MessageHandler> MllpServer<H, Unbound> {
    /// Create a server dispatching to `handler` with the default
    /// configuration and a single accept loop.
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            config: MllpConfig::default(),
            workers: 1,
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }

    /// Return `None` as the server is not bound.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to `addr`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::net::{Ipv4Addr, SocketAddr};
    ///
    /// use mllp::server::{HandlerError, HandlerResponse, MllpServer, ReceivedMessage};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let server = MllpServer::new(|_: &ReceivedMessage| -> Result<HandlerResponse, HandlerError> {
    ///     Ok(HandlerResponse::default())
    /// })
    /// .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    /// .expect("bind failed");
    /// assert!(server.local_addr().is_some());
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(self, addr: SocketAddr) -> Result<MllpServer<H, Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns [`ServerError::Bind`] if configuring the listener fails.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<MllpServer<H, Bound>, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        let MllpServer {
            handler,
            config,
            workers,
            backoff_config,
            ready_tx,
            ..
        } = self;
        Ok(MllpServer {
            handler,
            config,
            workers,
            backoff_config,
            ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl<H: MessageHandler> MllpServer<H, Bound> {
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }
}

impl<H, S> MllpServer<H, S>
where
    H: MessageHandler,
    S: ServerState,
{
    /// Replace the endpoint configuration.
    #[must_use]
    pub fn config(mut self, config: MllpConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of accept loops sharing the listener.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Configure accept-loop back-off.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff_config = backoff;
        self
    }

    /// Configure a channel signalled when the server is ready to accept
    /// connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn endpoint_config(&self) -> &MllpConfig { &self.config }

    /// Number of accept loops.
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.workers }
}

//! Runtime control for [`MllpServer`].

mod accept;
mod backoff;
#[cfg(test)]
mod tests;

use std::sync::Arc;

#[cfg(test)]
pub(super) use accept::MockAcceptListener;
pub(super) use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal, sync::Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{Bound, MessageHandler, MllpServer, ServerError, connection::ConnectionContext};

impl<H: MessageHandler> MllpServer<H, Bound> {
    /// Run the server until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the `Result` is reserved for future start-up
    /// failures.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// On shutdown the accept loops stop and connections waiting for a frame
    /// are closed. The call returns once every connection task has finished.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::net::{Ipv4Addr, SocketAddr};
    ///
    /// use mllp::server::{HandlerError, HandlerResponse, MllpServer, ReceivedMessage};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), mllp::server::ServerError> {
    /// let server = MllpServer::new(|_: &ReceivedMessage| -> Result<HandlerResponse, HandlerError> {
    ///     Ok(HandlerResponse::default())
    /// })
    /// .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// handle.await.expect("join server task")?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let MllpServer {
            handler,
            config,
            workers,
            backoff_config,
            ready_tx,
            state: Bound { listener },
        } = self;
        let local_addr = listener.local_addr().ok();
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let accept_timeout = config.accept_timeout;
        info!(
            "mllp server listening: local_addr={local_addr:?}, workers={workers}, \
             max_connections={}, receive_timeout={:?}",
            config.max_concurrent_connections, config.receive_timeout
        );
        let context = ConnectionContext {
            handler,
            permits: Arc::new(Semaphore::new(config.max_concurrent_connections)),
            config: Arc::new(config),
            shutdown: shutdown_token.clone(),
        };

        for options in (0..workers).map(|_| AcceptLoopOptions {
            accept_timeout,
            shutdown: shutdown_token.clone(),
            tracker: tracker.clone(),
            backoff: backoff_config,
        }) {
            tracker.spawn(accept_loop(Arc::clone(&listener), context.clone(), options));
        }

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("readiness receiver dropped: local_addr={local_addr:?}");
        }

        select! {
            () = shutdown => {
                info!("mllp server shutting down: local_addr={local_addr:?}");
                shutdown_token.cancel();
            }
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        info!("mllp server stopped: local_addr={local_addr:?}");
        Ok(())
    }
}

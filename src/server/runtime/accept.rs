//! Accept loop for the server runtime.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::BackoffConfig;
use crate::server::{
    MessageHandler,
    connection::{ConnectionContext, spawn_connection_task},
};

/// Source of incoming connections consumed by the accept loop.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Debug)]
pub(in crate::server) struct AcceptLoopOptions {
    pub accept_timeout: Duration,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accept connections from `listener` and spawn a task for each until
/// `shutdown` is cancelled.
///
/// Accept failures back off exponentially per `options.backoff`. An accept
/// that waits longer than `options.accept_timeout` is abandoned and retried
/// so that an idle listener is logged periodically.
pub(in crate::server) async fn accept_loop<H, L>(
    listener: Arc<L>,
    context: ConnectionContext<H>,
    options: AcceptLoopOptions,
) where
    H: MessageHandler,
    L: AcceptListener + 'static,
{
    let AcceptLoopOptions {
        accept_timeout,
        shutdown,
        tracker,
        backoff,
    } = options;
    let mut backoff = backoff.start();
    loop {
        let accepted = select! {
            biased;

            () = shutdown.cancelled() => break,
            res = timeout(accept_timeout, listener.accept()) => res,
        };
        let (stream, peer_addr) = match accepted {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                let delay = backoff.failed();
                warn!(
                    "accept failed: error={e}, failures={}, retry_in={delay:?}, local_addr={:?}",
                    backoff.failures(),
                    listener.local_addr().ok()
                );
                select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    () = sleep(delay) => {}
                }
                continue;
            }
            Err(_) => {
                debug!(
                    "no connection within accept timeout: timeout={accept_timeout:?}, \
                     local_addr={:?}",
                    listener.local_addr().ok()
                );
                continue;
            }
        };
        backoff.succeeded();
        spawn_connection_task(stream, peer_addr, &context, &tracker);
    }
}

//! Per-connection task for [`MllpServer`](super::MllpServer).

use std::{any::Any, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures::FutureExt;
use log::{debug, error, warn};
use tokio::{net::TcpStream, select, sync::Semaphore, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{MessageHandler, ReceivedMessage};
use crate::{
    ack::{AcknowledgementOrchestrator, UnitOfWork},
    config::{IdleTimeoutStrategy, MllpConfig},
    connection::{MllpConnection, Transport},
    error::{MllpError, Role},
    hl7::{MshFields, invalid_payload_message},
    metrics,
};

/// State shared by every connection task of one server.
pub(super) struct ConnectionContext<H> {
    pub handler: Arc<H>,
    pub config: Arc<MllpConfig>,
    pub permits: Arc<Semaphore>,
    pub shutdown: CancellationToken,
}

impl<H> Clone for ConnectionContext<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            config: Arc::clone(&self.config),
            permits: Arc::clone(&self.permits),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Spawn a task serving one accepted connection, logging and discarding any
/// panics.
///
/// Connections beyond the configured concurrency limit are reset straight
/// away.
pub(super) fn spawn_connection_task<H: MessageHandler>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    context: &ConnectionContext<H>,
    tracker: &TaskTracker,
) {
    let Ok(permit) = Arc::clone(&context.permits).try_acquire_owned() else {
        warn!(
            "connection limit reached; resetting connection: peer_addr={peer_addr}, limit={}",
            context.config.max_concurrent_connections
        );
        tracker.spawn(async move { MllpConnection::new(stream).reset().await });
        return;
    };
    if let Err(e) = context.config.socket_options.apply_to_stream(&stream) {
        warn!("failed to apply socket options: peer_addr={peer_addr}, error={e}");
    }

    let context = context.clone();
    tracker.spawn(async move {
        metrics::inc_connections();
        let fut = std::panic::AssertUnwindSafe(serve_connection(
            MllpConnection::new(stream),
            Some(peer_addr),
            &context,
        ))
        .catch_unwind();
        if let Err(panic) = fut.await {
            let panic_msg = panic_message(panic.as_ref());
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr}");
        }
        metrics::dec_connections();
        drop(permit);
    });
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else {
        format!("{panic:?}")
    }
}

/// Read, handle and acknowledge frames until the connection ends.
pub(super) async fn serve_connection<H, T>(
    mut conn: MllpConnection<T>,
    peer_addr: Option<SocketAddr>,
    context: &ConnectionContext<H>,
) where
    H: MessageHandler,
    T: Transport,
{
    let config = &context.config;
    let mut reader = config.reader(Role::Message);
    let mut orchestrator = AcknowledgementOrchestrator::new(config.writer(Role::Acknowledgement));
    let mut last_activity = Instant::now();
    debug!("connection opened: address={}", conn.address());

    loop {
        let read = select! {
            biased;

            () = context.shutdown.cancelled() => None,
            read = reader.read(&mut conn) => Some(read),
        };
        let Some(read) = read else {
            debug!("closing connection for shutdown: address={}", conn.address());
            conn.close().await;
            break;
        };
        match read {
            Ok(Some(payload)) => {
                last_activity = Instant::now();
                handle_frame(&mut conn, &mut orchestrator, payload, peer_addr, context).await;
                if !conn.is_open() {
                    break;
                }
            }
            Ok(None) => {
                let Some(idle) = config.idle_timeout else { continue };
                if last_activity.elapsed() < idle {
                    continue;
                }
                debug!(
                    "idle timeout: address={}, idle={idle:?}, strategy={:?}",
                    conn.address(),
                    config.idle_timeout_strategy
                );
                match config.idle_timeout_strategy {
                    IdleTimeoutStrategy::Reset => conn.reset().await,
                    IdleTimeoutStrategy::Close => conn.close().await,
                }
                break;
            }
            Err(err) => {
                debug!("connection ended: peer_addr={peer_addr:?}, error={err}");
                break;
            }
        }
    }
}

async fn handle_frame<H, T>(
    conn: &mut MllpConnection<T>,
    orchestrator: &mut AcknowledgementOrchestrator,
    payload: Bytes,
    peer_addr: Option<SocketAddr>,
    context: &ConnectionContext<H>,
) where
    H: MessageHandler,
    T: Transport,
{
    let config = &context.config;
    let mut work = UnitOfWork::new(payload.clone()).auto_ack(config.auto_ack);

    let invalid = if config.validate_payload {
        invalid_payload_message(&payload, payload.len())
    } else {
        None
    };
    if let Some(reason) = invalid {
        warn!("invalid message: address={}, reason={reason}", conn.address());
        metrics::inc_errors("invalid_message");
        work = work.processing_error(Some(reason));
    } else {
        let message = ReceivedMessage {
            headers: if config.hl7_headers {
                MshFields::parse(&payload)
            } else {
                None
            },
            payload,
            peer_addr,
        };
        match context.handler.handle(&message).await {
            Ok(response) => {
                work = work
                    .acknowledgement(response.acknowledgement)
                    .expected_code(response.code)
                    .msa_text(response.msa_text)
                    .directive(response.directive);
            }
            Err(e) => {
                warn!("message handler failed: address={}, error={e}", conn.address());
                work = work.processing_error(Some(e));
            }
        }
    }

    match orchestrator.acknowledge(conn, work).await {
        Ok(outcome) => {
            if outcome.delivery_failure.is_some() {
                conn.reset().await;
            }
        }
        Err(err) => {
            warn!("acknowledgement failed: address={}, error={err}", conn.address());
            metrics::inc_errors(err.error_type());
            if matches!(err, MllpError::AcknowledgementGeneration(_)) {
                conn.reset().await;
            }
        }
    }
}

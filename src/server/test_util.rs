//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use rstest::fixture;

use super::{Bound, HandlerError, HandlerResponse, MessageHandler, MllpServer, ReceivedMessage};
use crate::config::MllpConfig;

/// Records every payload it sees and answers with the default response.
#[derive(Clone, Debug, Default)]
pub struct TestHandler {
    pub received: Arc<Mutex<Vec<Bytes>>>,
}

#[async_trait]
impl MessageHandler for TestHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerResponse, HandlerError> {
        self.received
            .lock()
            .expect("handler lock")
            .push(message.payload.clone());
        Ok(HandlerResponse::default())
    }
}

#[fixture]
pub fn handler() -> TestHandler { TestHandler::default() }

#[fixture]
/// Returns a bound listener on a free port.
///
/// Keeping the listener bound prevents another process from claiming the
/// port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

pub fn bind_server<H: MessageHandler>(
    handler: H,
    config: MllpConfig,
    listener: StdTcpListener,
) -> MllpServer<H, Bound> {
    MllpServer::new(handler)
        .config(config)
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}

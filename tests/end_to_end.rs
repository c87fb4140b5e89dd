//! Server and client exchanging messages over TCP.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
    time::Duration,
};

use mllp::{
    MllpConfig,
    MllpError,
    ack::ConnectionDirective,
    client::MllpClient,
    hl7::AcknowledgementCode,
    server::{HandlerError, HandlerResponse, MessageHandler, MllpServer, ReceivedMessage},
};
use rstest::{fixture, rstest};
use tokio::{sync::oneshot, task::JoinHandle};

fn message(control_id: &str) -> Vec<u8> {
    format!(
        "MSH|^~\\&|SENDER|FAC|RECEIVER|FAC|20240101120000||ADT^A04|{control_id}|P|2.5\rPID|1||{control_id}\r"
    )
    .into_bytes()
}

#[fixture]
fn config() -> MllpConfig {
    MllpConfig::default()
        .receive_timeout(Duration::from_secs(2))
        .read_timeout(Duration::from_millis(500))
        .connect_timeout(Duration::from_secs(1))
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Running {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
    }
}

async fn start<H: MessageHandler>(handler: H, config: MllpConfig) -> Running {
    let listener =
        StdTcpListener::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).expect("bind");
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let server = MllpServer::new(handler)
        .config(config)
        .workers(1)
        .ready_signal(ready_tx)
        .bind_existing_listener(listener)
        .expect("bind server");
    let addr = server.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        server
            .run_with_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
            .expect("server run");
    });
    ready_rx.await.expect("ready signal");
    Running { addr, stop, handle }
}

/// Records control ids. `REJECT` fails and `HANGUP` closes after acknowledging.
fn recording_handler(
    seen: Arc<Mutex<Vec<String>>>,
) -> impl Fn(&ReceivedMessage) -> Result<HandlerResponse, HandlerError> + Send + Sync + 'static {
    move |message: &ReceivedMessage| -> Result<HandlerResponse, HandlerError> {
        let control_id = message
            .headers
            .as_ref()
            .and_then(|h| h.control_id.clone())
            .unwrap_or_default();
        seen.lock().expect("lock").push(control_id.clone());
        match control_id.as_str() {
            "REJECT" => Err("patient not found".into()),
            "HANGUP" => Ok(HandlerResponse::default().directive(ConnectionDirective::CloseAfterSend)),
            _ => Ok(HandlerResponse::default()),
        }
    }
}

#[rstest]
#[tokio::test]
async fn messages_are_acknowledged_in_order(config: MllpConfig) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server = start(recording_handler(seen.clone()), config.clone()).await;
    let mut client = MllpClient::new(server.addr, config);

    for id in ["A1", "A2", "A3"] {
        let ack = client.send(&message(id)).await.expect("send");
        assert_eq!(ack.code, Some(AcknowledgementCode::AA));
        let text = String::from_utf8_lossy(&ack.payload);
        assert!(text.contains(&format!("MSA|AA|{id}")), "{text}");
        assert!(text.contains(&format!("|{id}A|")), "{text}");
    }
    assert!(client.is_connected());
    assert_eq!(*seen.lock().expect("lock"), ["A1", "A2", "A3"]);

    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn handler_error_becomes_negative_acknowledgement(config: MllpConfig) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server = start(recording_handler(seen), config.clone()).await;
    let mut client = MllpClient::new(server.addr, config);

    let err = client.send(&message("REJECT")).await.expect_err("negative");
    match err.mllp() {
        MllpError::NegativeAcknowledgement {
            code,
            acknowledgement,
            ..
        } => {
            assert_eq!(*code, AcknowledgementCode::AE);
            assert!(String::from_utf8_lossy(acknowledgement).contains("patient not found"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let ack = client.send(&message("AFTER")).await.expect("send");
    assert_eq!(ack.code, Some(AcknowledgementCode::AA));

    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn client_reconnects_after_server_closes(config: MllpConfig) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server = start(recording_handler(seen.clone()), config.clone()).await;
    let mut client = MllpClient::new(server.addr, config);

    let ack = client.send(&message("HANGUP")).await.expect("send");
    assert_eq!(ack.code, Some(AcknowledgementCode::AA));

    let ack = client.send(&message("NEXT")).await.expect("send after close");
    assert_eq!(ack.code, Some(AcknowledgementCode::AA));
    assert_eq!(seen.lock().expect("lock").last().map(String::as_str), Some("NEXT"));

    client.close().await;
    server.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn invalid_payload_is_rejected_without_reaching_handler(config: MllpConfig) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server = start(
        recording_handler(seen.clone()),
        config.clone().validate_payload(true),
    )
    .await;
    let mut client = MllpClient::new(server.addr, config);

    let mut bad = message("BAD");
    bad.pop();
    let err = client.send(&bad).await.expect_err("rejected");
    assert!(matches!(
        err.mllp(),
        MllpError::NegativeAcknowledgement {
            code: AcknowledgementCode::AE,
            ..
        }
    ));
    assert!(seen.lock().expect("lock").is_empty());

    client.close().await;
    server.shutdown().await;
}

//! `mllp` command line tool: a minimal auto-acknowledging listener and a
//! one-shot sender.

mod cli;

use std::{error::Error, time::Duration};

use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Command};
use log::info;
use mllp::{
    MllpConfig,
    client::MllpClient,
    hl7::PrintFriendly,
    server::{HandlerError, HandlerResponse, MllpServer, ReceivedMessage},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }
    let config = MllpConfig::default()
        .receive_timeout(Duration::from_millis(cli.receive_timeout_ms))
        .read_timeout(Duration::from_millis(cli.read_timeout_ms))
        .validate_payload(cli.validate);

    match cli.command {
        Command::Listen {
            bind,
            max_connections,
        } => {
            let server = MllpServer::new(log_message)
                .config(config.max_concurrent_connections(max_connections))
                .bind(bind)?;
            server.run().await?;
        }
        Command::Send {
            addr,
            file,
            no_ack,
        } => {
            let message = normalise_segments(&std::fs::read(&file)?);
            let mut client = MllpClient::new(addr, config);
            if no_ack {
                client.send_only(&message).await?;
            } else {
                let ack = client.send(&message).await?;
                println!("{}", PrintFriendly(&ack.payload));
            }
            client.close().await;
        }
    }
    Ok(())
}

fn log_message(message: &ReceivedMessage) -> Result<HandlerResponse, HandlerError> {
    let control_id = message
        .headers
        .as_ref()
        .and_then(|h| h.control_id.as_deref())
        .unwrap_or("-");
    info!(
        "received message: peer_addr={:?}, control_id={control_id}, payload={}",
        message.peer_addr,
        PrintFriendly(&message.payload)
    );
    Ok(HandlerResponse::default())
}

/// Convert LF and CRLF line endings to HL7 segment delimiters and drop any
/// trailing blank lines after the final segment.
fn normalise_segments(raw: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        match byte {
            b'\r' if iter.peek() == Some(&b'\n') => {}
            b'\n' => out.push(b'\r'),
            other => out.push(other),
        }
    }
    while out.ends_with(b"\r\r") {
        out.pop();
    }
    Bytes::from(out)
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: std::net::SocketAddr) -> Result<(), Box<dyn Error + Send + Sync>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!("prometheus exporter listening: addr={addr}");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: std::net::SocketAddr) -> Result<(), Box<dyn Error + Send + Sync>> {
    log::warn!("metrics feature disabled; ignoring metrics address: addr={addr}");
    Ok(())
}

#![doc(html_root_url = "https://docs.rs/mllp/latest")]
//! Minimal Lower Layer Protocol (MLLP) framing for HL7 messaging.
//!
//! Each payload travels on a byte stream as
//!
//! ```text
//! 0x0B <payload> 0x1C 0x1D
//! ```
//!
//! The crate is layered bottom-up:
//!
//! - [`scanner`] locates frame markers in byte buffers;
//! - [`MllpSocketReader`] and [`MllpSocketWriter`] move one frame at a time
//!   over an [`MllpConnection`], resetting it whenever the stream can no
//!   longer be trusted;
//! - [`ack::AcknowledgementOrchestrator`] decides what is sent back for a
//!   received message and what happens to the connection around it;
//! - [`server::MllpServer`] and [`client::MllpClient`] put those pieces
//!   together over TCP.
//!
//! [`codec::MllpFrameCodec`] offers the same framing for
//! `tokio_util::codec::Framed`.

pub mod ack;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod hl7;
pub mod metrics;
pub mod protocol;
pub mod reader;
pub mod scanner;
pub mod server;
pub mod writer;

pub use config::{IdleTimeoutStrategy, MllpConfig};
pub use connection::{ConnectionState, MllpConnection, Transport};
pub use error::{CorruptFrameReason, MllpError, Role};
pub use reader::MllpSocketReader;
pub use writer::{MllpSocketWriter, WriteStrategy};

//! Utilities for exercising `mllp` readers, writers and connections with
//! in-memory streams during tests.
//!
//! ```rust
//! use mllp::{MllpSocketReader, protocol::envelope};
//! use mllp_testing::loopback;
//! use tokio::io::AsyncWriteExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (mut conn, mut peer, log) = loopback();
//! peer.write_all(&envelope(b"MSH|1\r")).await.unwrap();
//! let payload = MllpSocketReader::default().read(&mut conn).await.unwrap();
//! assert_eq!(payload.as_deref(), Some(&b"MSH|1\r"[..]));
//! assert_eq!(log.resets(), 0);
//! # }
//! ```

pub mod drive;
pub mod logging;
pub mod metrics;
pub mod transport;

pub use drive::{drip_feed, read_frame};
pub use logging::{LoggerHandle, logger};
pub use transport::{RecordingTransport, TeardownLog, loopback};

//! MLLP sender.
//!
//! [`MllpClient`] owns one outbound connection, opens it lazily and sends
//! messages one at a time, waiting for each acknowledgement before the next
//! send.

mod error;
mod runtime;

pub use error::ClientError;
pub use runtime::{Acknowledgement, MllpClient};

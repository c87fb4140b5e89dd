//! Metric helpers for `mllp`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::error::Role;

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "mllp_connections_active";
/// Name of the counter tracking frames read or written.
pub const FRAMES_PROCESSED: &str = "mllp_frames_processed_total";
/// Name of the counter tracking framing and acknowledgement errors.
pub const ERRORS_TOTAL: &str = "mllp_errors_total";
/// Name of the counter tracking discarded out-of-band bytes.
pub const OUT_OF_BAND_BYTES: &str = "mllp_out_of_band_bytes_total";
/// Name of the counter tracking forced connection resets.
pub const CONNECTION_RESETS: &str = "mllp_connection_resets_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame read or written in the given role.
pub fn inc_frames(direction: Direction, role: Role) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str(), "role" => role.as_str())
        .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (direction, role);
}

/// Record an error, labelled with its [`MllpError::error_type`](crate::MllpError::error_type).
pub fn inc_errors(error_type: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = error_type;
}

/// Record bytes discarded outside any frame.
pub fn add_out_of_band_bytes(count: usize) {
    #[cfg(feature = "metrics")]
    counter!(OUT_OF_BAND_BYTES).increment(count as u64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a forced connection reset.
pub fn inc_connection_resets() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTION_RESETS).increment(1);
}

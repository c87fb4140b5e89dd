//! Endpoint configuration shared by the server and client.
//!
//! [`MllpConfig`] is a plain value built with chained setters. Every setter
//! is `#[must_use]` and returns the updated configuration, so a fully
//! specified configuration reads as one expression.

use std::time::Duration;

use crate::{
    connection::SocketOptions,
    error::Role,
    protocol::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_RECEIVE_TIMEOUT},
    reader::MllpSocketReader,
    writer::{MllpSocketWriter, WriteStrategy},
};

/// Time allowed for `accept()` before the accept loop re-checks for shutdown.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Connections a server handles at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 5;

/// What to do with a connection that has been idle for longer than the
/// configured idle timeout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdleTimeoutStrategy {
    /// Abort the connection.
    #[default]
    Reset,
    /// Shut the connection down in an orderly fashion.
    Close,
}

/// Configuration for MLLP readers, writers, servers and clients.
///
/// # Defaults
/// - `receive_timeout`: 15 seconds
/// - `read_timeout`: 5 seconds
/// - `connect_timeout`: 30 seconds
/// - `accept_timeout`: 60 seconds
/// - `idle_timeout`: none
/// - `idle_timeout_strategy`: [`IdleTimeoutStrategy::Reset`]
/// - `socket_options`: [`SocketOptions::recommended`]
/// - `auto_ack`, `hl7_headers`, `require_end_of_data`: enabled
/// - `validate_payload`: disabled
/// - `write_strategy`: [`WriteStrategy::Buffered`]
/// - `max_concurrent_connections`: 5
/// - `max_payload_size`: unlimited
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mllp::{IdleTimeoutStrategy, MllpConfig};
///
/// let config = MllpConfig::default()
///     .read_timeout(Duration::from_secs(2))
///     .idle_timeout(Some(Duration::from_secs(30)))
///     .idle_timeout_strategy(IdleTimeoutStrategy::Close)
///     .validate_payload(true);
/// assert_eq!(config.read_timeout, Duration::from_secs(2));
/// assert!(config.auto_ack);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MllpConfig {
    /// Time allowed to find the start of a frame.
    pub receive_timeout: Duration,
    /// Time allowed for each read once a frame has started.
    pub read_timeout: Duration,
    /// Time allowed to establish an outbound connection.
    pub connect_timeout: Duration,
    /// Interval after which a pending `accept()` is abandoned and retried.
    pub accept_timeout: Duration,
    /// Idle period after which a connection is torn down.
    pub idle_timeout: Option<Duration>,
    /// How idle connections are torn down.
    pub idle_timeout_strategy: IdleTimeoutStrategy,
    /// Options applied to every socket.
    pub socket_options: SocketOptions,
    /// Synthesise acknowledgements when the handler supplies none.
    pub auto_ack: bool,
    /// Extract MSH fields from received messages.
    pub hl7_headers: bool,
    /// Require `END_OF_DATA` after `END_OF_BLOCK`.
    pub require_end_of_data: bool,
    /// Validate payloads before handing them on.
    pub validate_payload: bool,
    /// How frames are written.
    pub write_strategy: WriteStrategy,
    /// Upper bound on simultaneously served connections.
    pub max_concurrent_connections: usize,
    /// Upper bound on a single payload.
    pub max_payload_size: Option<usize>,
}

impl Default for MllpConfig {
    fn default() -> Self {
        Self {
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            idle_timeout: None,
            idle_timeout_strategy: IdleTimeoutStrategy::default(),
            socket_options: SocketOptions::recommended(),
            auto_ack: true,
            hl7_headers: true,
            require_end_of_data: true,
            validate_payload: false,
            write_strategy: WriteStrategy::default(),
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            max_payload_size: None,
        }
    }
}

impl MllpConfig {
    /// Set the time allowed to find the start of a frame.
    #[must_use]
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the time allowed for each read once a frame has started.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the accept timeout.
    #[must_use]
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Set or clear the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Choose how idle connections are torn down.
    #[must_use]
    pub fn idle_timeout_strategy(mut self, strategy: IdleTimeoutStrategy) -> Self {
        self.idle_timeout_strategy = strategy;
        self
    }

    /// Replace the socket options.
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Enable or disable automatic acknowledgements.
    #[must_use]
    pub fn auto_ack(mut self, enabled: bool) -> Self {
        self.auto_ack = enabled;
        self
    }

    /// Enable or disable MSH field extraction.
    #[must_use]
    pub fn hl7_headers(mut self, enabled: bool) -> Self {
        self.hl7_headers = enabled;
        self
    }

    /// Require `END_OF_DATA` after `END_OF_BLOCK`.
    #[must_use]
    pub fn require_end_of_data(mut self, enabled: bool) -> Self {
        self.require_end_of_data = enabled;
        self
    }

    /// Enable or disable payload validation.
    #[must_use]
    pub fn validate_payload(mut self, enabled: bool) -> Self {
        self.validate_payload = enabled;
        self
    }

    /// Choose the write strategy.
    #[must_use]
    pub fn write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }

    /// Cap simultaneously served connections. Values below one are raised to
    /// one.
    #[must_use]
    pub fn max_concurrent_connections(mut self, max: usize) -> Self {
        self.max_concurrent_connections = max.max(1);
        self
    }

    /// Cap the size of a single payload.
    #[must_use]
    pub fn max_payload_size(mut self, max: Option<usize>) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Build a reader for `role` using these settings.
    #[must_use]
    pub fn reader(&self, role: Role) -> MllpSocketReader {
        MllpSocketReader::new(role, self.receive_timeout, self.read_timeout)
            .require_end_of_data(self.require_end_of_data)
            .max_payload_size(self.max_payload_size)
    }

    /// Build a writer for `role` using these settings.
    #[must_use]
    pub fn writer(&self, role: Role) -> MllpSocketWriter {
        MllpSocketWriter::new(role).strategy(self.write_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_endpoint_defaults() {
        let config = MllpConfig::default();
        assert_eq!(config.receive_timeout, Duration::from_secs(15));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.accept_timeout, Duration::from_secs(60));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.idle_timeout_strategy, IdleTimeoutStrategy::Reset);
        assert_eq!(config.max_concurrent_connections, 5);
        assert!(config.require_end_of_data);
        assert!(!config.validate_payload);
        assert_eq!(config.write_strategy, WriteStrategy::Buffered);
    }

    #[test]
    fn concurrency_cap_is_at_least_one() {
        assert_eq!(
            MllpConfig::default()
                .max_concurrent_connections(0)
                .max_concurrent_connections,
            1
        );
    }

    #[test]
    fn factories_carry_role_and_settings() {
        let config = MllpConfig::default()
            .read_timeout(Duration::from_millis(250))
            .write_strategy(WriteStrategy::Unbuffered);
        let reader = config.reader(Role::Acknowledgement);
        assert_eq!(reader.role(), Role::Acknowledgement);
        assert_eq!(reader.read_timeout(), Duration::from_millis(250));
        let writer = config.writer(Role::Message);
        assert_eq!(writer.role(), Role::Message);
        assert_eq!(writer.write_strategy(), WriteStrategy::Unbuffered);
    }
}

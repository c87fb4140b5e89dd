//! Accept-failure back-off.

use std::time::Duration;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Exponential back-off applied when `accept()` fails.
///
/// The delay starts at `initial_delay` and doubles on each consecutive
/// failure, capped at `max_delay`. A successful accept resets it.
///
/// Defaults: 10 ms initial, 1 s cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Raise both delays to at least one millisecond and swap them if the
    /// cap is below the initial delay.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use mllp::server::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::ZERO,
    /// }
    /// .normalized();
    /// assert_eq!(cfg.initial_delay, Duration::from_millis(1));
    /// assert_eq!(cfg.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(self) -> Self {
        let a = self.initial_delay.max(MIN_DELAY);
        let b = self.max_delay.max(MIN_DELAY);
        Self {
            initial_delay: a.min(b),
            max_delay: a.max(b),
        }
    }

    pub(crate) fn start(self) -> AcceptBackoff {
        let config = self.normalized();
        AcceptBackoff {
            config,
            next: config.initial_delay,
            failures: 0,
        }
    }
}

/// Running back-off state for one accept loop.
#[derive(Debug)]
pub(crate) struct AcceptBackoff {
    config: BackoffConfig,
    next: Duration,
    failures: u32,
}

impl AcceptBackoff {
    /// Record a failure and return how long to wait before retrying.
    pub(crate) fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.config.max_delay);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Record a successful accept.
    pub(crate) fn succeeded(&mut self) {
        self.next = self.config.initial_delay;
        self.failures = 0;
    }

    /// Failures since the last success.
    pub(crate) fn failures(&self) -> u32 { self.failures }
}

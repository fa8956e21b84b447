use crate::conn::FailurePolicy;
use std::time::Duration;

/// Tunables of a dual-channel link.
#[derive(Clone, Debug)]
pub struct LinkConfiguration {
    connect_timeout: Duration,
    read_timeout: Duration,
    heartbeat_interval: Duration,
    auto_reconnect: bool,
    reconnect_max_attempts: u32,
    failure_policy: FailurePolicy,
    max_in_flight: usize,
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            auto_reconnect: true,
            reconnect_max_attempts: Self::DEFAULT_RECONNECT_MAX_ATTEMPTS,
            failure_policy: FailurePolicy::default(),
            max_in_flight: Self::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl LinkConfiguration {
    /// Default deadline for establishing one TCP connection.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default receive-side staleness threshold. No traffic for this long
    /// logs a staleness warning and feeds the link's health signal.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default interval of the echo-test heartbeat. The same interval is
    /// the write-idle threshold that triggers an off-schedule heartbeat.
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

    /// Default budget of consecutive reconnection attempts per channel.
    pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;

    /// Default soft cap on concurrently outstanding requests; beyond it
    /// submissions fail fast with `Overloaded`.
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 1_024;

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
    /// Sets the connect timeout.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }
    /// Builder-method for setting the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the read-staleness threshold.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
    /// Sets the read-staleness threshold.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
    /// Builder-method for setting the read-staleness threshold.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Returns the heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
    /// Sets the heartbeat interval.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.heartbeat_interval = interval;
    }
    /// Builder-method for setting the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Returns whether lost channels are reopened automatically.
    pub fn is_auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }
    /// Defines whether lost channels are reopened automatically.
    pub fn set_auto_reconnect(&mut self, on: bool) {
        self.auto_reconnect = on;
    }
    /// Builder-method for defining whether lost channels are reopened
    /// automatically.
    #[must_use]
    pub fn with_auto_reconnect(mut self, on: bool) -> Self {
        self.auto_reconnect = on;
        self
    }

    /// Returns the reconnection attempt budget.
    pub fn reconnect_max_attempts(&self) -> u32 {
        self.reconnect_max_attempts
    }
    /// Sets the reconnection attempt budget.
    pub fn set_reconnect_max_attempts(&mut self, attempts: u32) {
        self.reconnect_max_attempts = attempts;
    }
    /// Builder-method for setting the reconnection attempt budget.
    #[must_use]
    pub fn with_reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Returns the failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
    /// Sets the failure policy.
    pub fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.failure_policy = policy;
    }
    /// Builder-method for setting the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Returns the in-flight window.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
    /// Sets the in-flight window.
    pub fn set_max_in_flight(&mut self, window: usize) {
        self.max_in_flight = window;
    }
    /// Builder-method for setting the in-flight window.
    #[must_use]
    pub fn with_max_in_flight(mut self, window: usize) -> Self {
        self.max_in_flight = window;
        self
    }
}

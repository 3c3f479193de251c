//! Timing and device selection for the bridge

use tokio::time::Duration;

/// Timers and thresholds of the connection and poll state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Time between polls while connected
    pub poll_period: Duration,
    /// Longest a connect attempt, including discovery, may take
    pub connect_timeout: Duration,
    /// Time to wait before connecting again after a failure or disconnect
    pub reconnect_backoff: Duration,
    /// Delay between subscribing and sending the first poll
    pub settle_delay: Duration,
    /// Delay between a write and the poll that confirms it
    pub confirm_delay: Duration,
    /// Consecutive failed periods after which the power source is reported unknown
    pub failure_threshold: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(45),
            reconnect_backoff: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
            confirm_delay: Duration::from_millis(300),
            failure_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Devices advertise a name starting with this
    pub device_name_prefix: String,
    pub timing: Timing,
}

impl BridgeConfig {
    pub const DEFAULT_NAME_PREFIX: &'static str = "POWER";
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_name_prefix: Self::DEFAULT_NAME_PREFIX.to_string(),
            timing: Timing::default(),
        }
    }
}

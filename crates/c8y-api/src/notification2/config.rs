use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// When acknowledgments are sent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AckMode {
    /// The handler calls [`Message::ack`](super::Message::ack) itself.
    #[default]
    Manual,
    /// The dispatcher acks right after the handler returns `Ok`
    /// (or after the message is enqueued, for queue sinks).
    Auto,
}

/// Listener behaviour: reconnect budget, ack policy, buffering, tokens.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Reconnect attempts after a drop before giving up. Default: 5.
    pub max_retries: u32,

    /// Delay before the first reconnect attempt. Default: 1s.
    pub backoff_base: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub backoff_max: Duration,

    /// Bound on one connection attempt (token request + handshake). Default: 30s.
    pub connect_timeout: Duration,

    /// Manual or automatic acknowledgment. Default: manual.
    pub ack_mode: AckMode,

    /// In auto mode, still ack a message whose handler failed. Default: true.
    pub ack_on_handler_error: bool,

    /// Capacity of the queue sink. Default: 64.
    pub queue_capacity: usize,

    /// Consecutive malformed frames tolerated before the connection is
    /// dropped and re-established. Default: 5.
    pub max_protocol_errors: u32,

    /// Validity of each requested channel token, in minutes. Default: 1440.
    pub token_validity_minutes: u32,

    /// Request non-persistent tokens. Default: false.
    pub non_persistent: bool,

    /// Unsubscribe the subscriber after a graceful stop. Default: false.
    pub unsubscribe_on_stop: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            ack_mode: AckMode::Manual,
            ack_on_handler_error: true,
            queue_capacity: 64,
            max_protocol_errors: 5,
            token_validity_minutes: 1440,
            non_persistent: false,
            unsubscribe_on_stop: false,
        }
    }
}

impl ListenerConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// `delay = min(backoff_base * 2^(attempt - 1), backoff_max)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Queue capacity, never zero.
    pub(crate) fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    /// Protocol-error threshold, never zero.
    pub(crate) fn effective_max_protocol_errors(&self) -> u32 {
        self.max_protocol_errors.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listener_config() {
        let config = ListenerConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert_eq!(config.ack_mode, AckMode::Manual);
        assert!(config.ack_on_handler_error);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = ListenerConfig {
            backoff_base: Duration::from_millis(100),
            ..ListenerConfig::default()
        };

        assert_eq!(config.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ListenerConfig {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
            ..ListenerConfig::default()
        };

        assert_eq!(config.backoff_delay(10), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn ack_mode_parses_case_insensitively() {
        assert_eq!("auto".parse::<AckMode>().ok(), Some(AckMode::Auto));
        assert_eq!("MANUAL".parse::<AckMode>().ok(), Some(AckMode::Manual));
        assert!("sometimes".parse::<AckMode>().is_err());
        assert_eq!(AckMode::Auto.to_string(), "auto");
    }

    #[test]
    fn zero_capacities_are_clamped() {
        let config = ListenerConfig {
            queue_capacity: 0,
            max_protocol_errors: 0,
            ..ListenerConfig::default()
        };
        assert_eq!(config.effective_queue_capacity(), 1);
        assert_eq!(config.effective_max_protocol_errors(), 1);
    }
}

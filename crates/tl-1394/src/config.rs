//! Command server configuration.

use std::time::Duration;

use fcp::Speed;
use serde::{Deserialize, Serialize};

use crate::consts;

/// How busy acknowledgements are charged against a command's retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyBudget {
    /// A busy acknowledgement consumes one protocol attempt, so a command is
    /// transmitted at most `max_retries + 1` times in total.
    #[default]
    Shared,
    /// Up to `n` busy re-sends per attempt that do not consume protocol attempts.
    Separate(u32),
}

/// Tunables of a [`CommandServer`](crate::CommandServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Protocol retries after the first transmission.
    pub max_retries: u32,
    pub busy_budget: BusyBudget,
    #[serde(with = "millis")]
    pub busy_delay: Duration,
    #[serde(with = "millis")]
    pub ack_timeout: Duration,
    /// Wait for a correlated response after each acknowledged transmission.
    #[serde(with = "millis")]
    pub split_timeout: Duration,
    /// Wait for the final response once a notify command got its interim response.
    #[serde(with = "millis")]
    pub interim_timeout: Duration,
    pub queue_depth: usize,
    /// Transmission speed; the bus maximum when unset.
    pub speed: Option<Speed>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_retries: consts::MAX_RETRIES,
            busy_budget: BusyBudget::Shared,
            busy_delay: consts::BUSY_DELAY,
            ack_timeout: consts::ACK_TIMEOUT,
            split_timeout: consts::SPLIT_TIMEOUT,
            interim_timeout: consts::INTERIM_TIMEOUT,
            queue_depth: consts::QUEUE_DEPTH,
            speed: None,
        }
    }
}

/// Durations as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

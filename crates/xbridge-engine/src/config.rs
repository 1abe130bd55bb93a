use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xbridge_transport::Endpoint;

use crate::error::Result;

/// Timing and endpoint configuration for a [`crate::Supervisor`].
///
/// Durations are written as integer milliseconds in JSON. Missing fields
/// take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Serial gateway to connect to.
    pub endpoint: Endpoint,
    /// Bound on a single TCP connect attempt.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Quiet period before each (re)connect, so the byte stream can resync.
    #[serde(with = "duration_ms")]
    pub resync_pause: Duration,
    /// Pause after a failed connect or negotiation.
    #[serde(with = "duration_ms")]
    pub reconnect_backoff: Duration,
    /// How often the supervising loop checks connection health.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Wait bound for local AT and transmit-status replies.
    #[serde(with = "duration_ms")]
    pub response_timeout: Duration,
    /// Wait bound for acknowledged remote AT replies.
    #[serde(with = "duration_ms")]
    pub remote_response_timeout: Duration,
    /// Silence before the transparent-mode escape is queued.
    #[serde(with = "duration_ms")]
    pub pre_escape_wait: Duration,
    /// Silence the sender keeps on both sides of `+++`.
    #[serde(with = "duration_ms")]
    pub guard_time: Duration,
    /// Wait bound for each reply in a transparent-mode dialog.
    #[serde(with = "duration_ms")]
    pub dialog_timeout: Duration,
    /// Read timeout of the reader worker, doubling as its housekeeping tick.
    #[serde(with = "duration_ms")]
    pub read_tick: Duration,
    /// Age after which an incomplete inbound frame is discarded.
    #[serde(with = "duration_ms")]
    pub partial_frame_timeout: Duration,
    /// Age after which an unclaimed frame is dropped from the store.
    #[serde(with = "duration_ms")]
    pub frame_max_age: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::tcp("127.0.0.1", 4001),
            connect_timeout: Duration::from_secs(5),
            resync_pause: Duration::from_millis(500),
            reconnect_backoff: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            response_timeout: Duration::from_millis(5000),
            remote_response_timeout: Duration::from_millis(15000),
            pre_escape_wait: Duration::from_millis(1500),
            guard_time: Duration::from_millis(1200),
            dialog_timeout: Duration::from_millis(6000),
            read_tick: Duration::from_millis(250),
            partial_frame_timeout: xbridge_frame::DEFAULT_PARTIAL_FRAME_TIMEOUT,
            frame_max_age: Duration::from_secs(60),
        }
    }
}

impl SupervisorConfig {
    /// Default configuration for the given gateway.
    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Serialise a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

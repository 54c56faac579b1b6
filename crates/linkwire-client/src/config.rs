use std::time::Duration;

use linkwire_frame::{BufferConfig, FrameConfig, MAX_FRAME_SIZE};
use linkwire_transport::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Keepalive settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between heartbeats. Default: 5 s.
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Consecutive unanswered heartbeats before the connection is dead. Default: 3.
    pub timeout_count: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout_count: 3,
        }
    }
}

/// Auto-reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect after unintentional disconnects. Default: true.
    pub enabled: bool,
    /// Wait before each attempt. Default: 3 s.
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Attempts per campaign; 0 means unlimited. Default: 5.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// Outbound token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Tokens refilled per second. Default: 50.
    pub rate_per_sec: f64,
    /// Bucket size. Default: 100.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_per_sec: 50.0,
            burst: 100,
        }
    }
}

/// Everything a [`Client`](crate::Client) is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Limit on opening the transport. Default: 10 s.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// Default per-request deadline. Default: 10 s.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// How often expired pending requests are swept. Default: 100 ms.
    #[serde(rename = "pending_sweep_interval_ms", with = "millis")]
    pub pending_sweep_interval: Duration,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    pub rate_limit: RateLimitConfig,
    /// Largest accepted frame body. Clamped to 1 MiB.
    pub max_frame_size: usize,
    /// Receive buffer floor in bytes. Default: 8 KiB.
    pub buffer_floor: usize,
    /// Low-usage cycles before the receive buffer shrinks. Default: 16.
    pub buffer_shrink_window: u32,
    /// Usage fraction below which a cycle counts as low. Default: 0.25.
    pub buffer_shrink_threshold: f64,
    /// Capacity of the state-change broadcast. Default: 64.
    pub state_channel_capacity: usize,
    /// Outbound queue capacity handed to the transport. Default: 1024.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let buffer = BufferConfig::default();
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            pending_sweep_interval: Duration::from_millis(100),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            rate_limit: RateLimitConfig::default(),
            max_frame_size: MAX_FRAME_SIZE,
            buffer_floor: buffer.floor,
            buffer_shrink_window: buffer.shrink_window,
            buffer_shrink_threshold: buffer.shrink_threshold,
            state_channel_capacity: 64,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| Err(ClientError::InvalidConfig(format!("{name} must be > 0")));

        if self.connect_timeout.is_zero() {
            return zero("connect_timeout");
        }
        if self.request_timeout.is_zero() {
            return zero("request_timeout");
        }
        if self.pending_sweep_interval.is_zero() {
            return zero("pending_sweep_interval");
        }
        if self.heartbeat.interval.is_zero() {
            return zero("heartbeat.interval");
        }
        if self.heartbeat.timeout_count == 0 {
            return zero("heartbeat.timeout_count");
        }
        if self.reconnect.enabled && self.reconnect.interval.is_zero() {
            return zero("reconnect.interval");
        }
        if self.rate_limit.enabled {
            let rate = self.rate_limit.rate_per_sec;
            if !rate.is_finite() || rate <= 0.0 {
                return zero("rate_limit.rate_per_sec");
            }
            if self.rate_limit.burst == 0 {
                return zero("rate_limit.burst");
            }
        }
        if self.max_frame_size == 0 {
            return zero("max_frame_size");
        }
        if self.buffer_floor == 0 {
            return zero("buffer_floor");
        }
        if !(0.0..=1.0).contains(&self.buffer_shrink_threshold) {
            return Err(ClientError::InvalidConfig(
                "buffer_shrink_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.state_channel_capacity == 0 {
            return zero("state_channel_capacity");
        }
        if self.queue_capacity == 0 {
            return zero("queue_capacity");
        }
        Ok(())
    }

    /// Frame decoding settings derived from this config.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_frame_size: self.max_frame_size.min(MAX_FRAME_SIZE),
            buffer: BufferConfig {
                floor: self.buffer_floor,
                shrink_window: self.buffer_shrink_window,
                shrink_threshold: self.buffer_shrink_threshold,
                ..BufferConfig::default()
            },
        }
    }

    /// Parse a JSON config document. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.rate_limit.burst, 100);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let json = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(json["connect_timeout_ms"], 10_000);
        assert_eq!(json["heartbeat"]["interval_ms"], 5_000);
        assert_eq!(json["reconnect"]["interval_ms"], 3_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            ClientConfig::from_json(r#"{"heartbeat":{"interval_ms":30000},"request_timeout_ms":5000}"#)
                .unwrap();
        assert_eq!(config.heartbeat.interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat.timeout_count, 3);
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut config = ClientConfig::default();
        config.heartbeat.timeout_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ClientError::InvalidConfig(_))
        ));

        let mut config = ClientConfig::default();
        config.rate_limit.rate_per_sec = 0.0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.rate_per_sec = 0.0;
        assert!(config.validate().is_ok());

        assert!(ClientConfig::from_json(r#"{"connect_timeout_ms":0}"#).is_err());
    }
}

//! Session configuration.
//!
//! Every field has a default; a configuration can also be loaded from JSON,
//! where missing fields fall back to those defaults.
//!
//! ```
//! use mtwire_client::SessionConfig;
//! use std::time::Duration;
//!
//! let config = SessionConfig::from_json_str(r#"{
//!     "arena": [{"bucket_size": 4096, "count": 16}],
//!     "request_timeout_ms": 2500
//! }"#).unwrap();
//!
//! assert_eq!(config.request_timeout, Duration::from_millis(2500));
//! assert_eq!(config.arena.total_size(), 4096 * 16);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{MtwireError, Result};
use crate::ocean::ArenaConfig;
use crate::protocol::{DEFAULT_MAX_PACKET_LENGTH, MIN_PACKET_LENGTH};

/// Default socket read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default time a request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Size classes of the packet buffer arena.
    pub arena: ArenaConfig,
    /// Largest incoming packet accepted, clamped to the largest bucket.
    pub max_packet_length: usize,
    /// Bytes requested from the socket per read.
    pub read_buffer_size: usize,
    /// Capacity of the outbound message channel.
    pub channel_capacity: usize,
    /// How long `invoke` waits for a response.
    #[serde(rename = "request_timeout_ms", deserialize_with = "duration_from_millis")]
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before a session is started.
    pub fn validate(&self) -> Result<()> {
        self.arena.validate()?;

        if self.max_packet_length < MIN_PACKET_LENGTH {
            return Err(MtwireError::InvalidConfig(format!(
                "max_packet_length {} is below the minimum packet length {}",
                self.max_packet_length, MIN_PACKET_LENGTH
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(MtwireError::InvalidConfig(
                "read_buffer_size must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(MtwireError::InvalidConfig(
                "channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            arena: ArenaConfig::default(),
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.max_packet_length, DEFAULT_MAX_PACKET_LENGTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json_str(r#"{"channel_capacity": 8}"#).unwrap();
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.arena, ArenaConfig::default());
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_json_with_all_fields() {
        let config = SessionConfig::from_json_str(
            r#"{
                "arena": [{"bucket_size": 128, "count": 2}],
                "max_packet_length": 128,
                "read_buffer_size": 512,
                "channel_capacity": 4,
                "request_timeout_ms": 150
            }"#,
        )
        .unwrap();

        assert_eq!(config.arena, ArenaConfig::new().class(128, 2));
        assert_eq!(config.max_packet_length, 128);
        assert_eq!(config.read_buffer_size, 512);
        assert_eq!(config.request_timeout, Duration::from_millis(150));
    }

    #[test]
    fn test_invalid_json_values() {
        let err = SessionConfig::from_json_str(r#"{"channel_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, MtwireError::InvalidConfig(_)));

        let err = SessionConfig::from_json_str(r#"{"arena": []}"#).unwrap_err();
        assert!(matches!(err, MtwireError::InvalidConfig(_)));

        let err = SessionConfig::from_json_str(r#"{"max_packet_length": 4}"#).unwrap_err();
        assert!(err.to_string().contains("below the minimum packet length"));

        let err = SessionConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, MtwireError::Json(_)));
    }
}

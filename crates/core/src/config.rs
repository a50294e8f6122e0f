//! Runtime configuration, loadable from TOML.
//!
//! Every section has defaults, so an empty file is a valid config:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8554"
//! fps = 30
//!
//! [quality]
//! control_interval_ms = 2000
//!
//! [pool]
//! max_bytes = 67108864
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub quality: QualityConfig,
    pub pool: PoolConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.fps == 0 {
            return Err(invalid("server.fps", "must be greater than zero"));
        }
        if server.mtu < 16 {
            return Err(invalid("server.mtu", "must be at least 16 bytes"));
        }
        if !(96..=127).contains(&server.payload_type) {
            return Err(invalid(
                "server.payload_type",
                "must be a dynamic payload type (96-127)",
            ));
        }
        if self.quality.control_interval_ms == 0 {
            return Err(invalid(
                "quality.control_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.pool.max_buffers_per_bucket == 0 {
            return Err(invalid(
                "pool.max_buffers_per_bucket",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Server-level configuration used by protocol handlers and RTP delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// RTSP listen address (`host:port`).
    pub bind: String,
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// Dynamic RTP payload type advertised for H.264.
    pub payload_type: u8,
    /// Payload budget per RTP packet, excluding the 12-byte header.
    pub mtu: usize,
    /// Nominal encoder frame rate, used for the 90 kHz timestamp.
    pub fps: u32,
    /// How long DESCRIBE waits for SPS/PPS before answering 503.
    pub describe_timeout_ms: u64,
    /// Advertised in the `Session` header (RFC 2326 §12.37).
    pub session_timeout_secs: u64,
}

impl ServerConfig {
    pub fn describe_timeout(&self) -> Duration {
        Duration::from_millis(self.describe_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8554".to_string(),
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Live".to_string(),
            payload_type: 96,
            mtu: 1400,
            fps: 30,
            describe_timeout_ms: 3000,
            session_timeout_secs: 60,
        }
    }
}

/// Tuning for the [`QualityController`](crate::quality::QualityController).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum spacing between two adjustments of the same client.
    pub control_interval_ms: u64,
    /// Largest quality change per adjustment.
    pub quality_step: u8,
    /// Largest frame interval change per adjustment.
    pub frame_interval_step_ms: u32,
    /// Largest resolution scale change per adjustment.
    pub resolution_step: f32,
}

impl QualityConfig {
    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            control_interval_ms: 2000,
            quality_step: 5,
            frame_interval_step_ms: 20,
            resolution_step: 0.1,
        }
    }
}

/// Limits for the [`FrameBufferPool`](crate::pool::FrameBufferPool).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Cap on bytes held by queued (idle) buffers across all buckets.
    pub max_bytes: usize,
    /// Cap on idle buffers per (width, height, format) bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_buffers_per_bucket: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8554");
        assert_eq!(config.server.payload_type, 96);
        assert_eq!(config.server.mtu, 1400);
        assert_eq!(config.quality.control_interval(), Duration::from_secs(2));
        assert_eq!(config.pool.max_buffers_per_bucket, 5);
    }

    #[test]
    fn partial_sections_override_fields() {
        let raw = r#"
            [server]
            bind = "127.0.0.1:9554"
            fps = 25

            [pool]
            max_bytes = 1024
        "#;
        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9554");
        assert_eq!(config.server.fps, 25);
        assert_eq!(config.server.describe_timeout_ms, 3000);
        assert_eq!(config.pool.max_bytes, 1024);
        assert_eq!(config.pool.max_buffers_per_bucket, 5);
    }

    #[test]
    fn rejects_zero_fps() {
        let err = Config::from_toml_str("[server]\nfps = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "server.fps",
                ..
            }
        ));
    }

    #[test]
    fn rejects_static_payload_type() {
        assert!(Config::from_toml_str("[server]\npayload_type = 26\n").is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = Config::from_toml_str("[server\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

//! Configuration file format.
//!
//! Every section is optional; missing values fall back to the defaults the
//! device ships with. Nothing here is ever written back to disk.

use crate::capture::CaptureConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid JPEG quality {0} (must be 0-63)")]
    InvalidJpegQuality(u8),
    #[error("frame buffer count must be at least 1")]
    InvalidFrameBufferCount,
    #[error("invalid XCLK frequency {0} Hz")]
    InvalidClockFrequency(u32),
    #[error("required camera pin is unassigned ({0})")]
    InvalidPin(i32),
    #[error("capture interval must be greater than zero")]
    InvalidInterval,
    #[error("{0} must be greater than zero")]
    ZeroDelay(&'static str),
    #[error("invalid topic {0:?}: must be non-empty without wildcards")]
    InvalidTopic(String),
    #[error("broker host must not be empty")]
    MissingBrokerHost,
    #[error("broker port must not be zero")]
    InvalidPort,
    #[error("message buffer of {0} bytes is too small")]
    BufferTooSmall(usize),
    #[error("invalid {name} retry policy: {reason}")]
    InvalidRetryPolicy {
        name: &'static str,
        reason: &'static str,
    },
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Identity of this unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Human-readable name printed in the startup banner.
    pub name: String,
    /// Stable hardware identifier used by the `hardware` client-id source.
    /// Read from `/etc/machine-id` when unset.
    pub hardware_id: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "Electric Meter".to_string(),
            hardware_id: None,
        }
    }
}

/// WiFi association settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    /// Delay between association status polls.
    pub poll_interval_ms: u64,
    /// Give up association after this many polls (`None` waits forever).
    pub max_polls: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            poll_interval_ms: 500,
            max_polls: None,
        }
    }
}

impl NetworkConfig {
    /// Retry policy for the association busy-poll.
    pub fn association_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(Duration::from_millis(self.poll_interval_ms));
        match self.max_polls {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }
}

/// Where the client-id suffix comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientIdSource {
    /// Fresh pseudo-random suffix on every connect attempt.
    #[default]
    Random,
    /// Suffix derived from the device's hardware identifier.
    Hardware,
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic every image is published to.
    pub topic: String,
    pub client_id_prefix: String,
    pub client_id_source: ClientIdSource,
    /// Largest encoded packet the client will send or accept, in bytes.
    pub buffer_size: usize,
    pub keep_alive_secs: u16,
    /// Socket connect and CONNACK wait timeout.
    pub socket_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            topic: "home/meter/electric/image".to_string(),
            client_id_prefix: "ESP32CAM-Electric-".to_string(),
            client_id_source: ClientIdSource::Random,
            buffer_size: 32 * 1024,
            keep_alive_secs: 15,
            socket_timeout_secs: 15,
        }
    }
}

impl BrokerConfig {
    /// Smallest buffer that still fits protocol overhead.
    pub const MIN_BUFFER_SIZE: usize = 128;

    /// Validates the broker parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingBrokerHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.topic.is_empty() || self.topic.contains(['+', '#']) {
            return Err(ConfigError::InvalidTopic(self.topic.clone()));
        }
        if self.buffer_size < Self::MIN_BUFFER_SIZE {
            return Err(ConfigError::BufferTooSmall(self.buffer_size));
        }
        Ok(())
    }
}

/// Loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minimum time between capture cycles.
    pub capture_interval_ms: u64,
    /// Cooperative yield at the end of every loop iteration.
    pub loop_delay_ms: u64,
    /// Broker reconnect policy.
    pub reconnect: RetryPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: 300_000,
            loop_delay_ms: 100,
            reconnect: RetryPolicy::fixed(Duration::from_secs(5)),
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics server port (0 to disable).
    pub port: u16,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capture.validate()?;
        self.broker.validate()?;
        if self.schedule.capture_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if self.schedule.loop_delay_ms == 0 {
            return Err(ConfigError::ZeroDelay("schedule.loop_delay_ms"));
        }
        if self.network.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroDelay("network.poll_interval_ms"));
        }
        self.schedule
            .reconnect
            .validate()
            .map_err(|reason| ConfigError::InvalidRetryPolicy {
                name: "reconnect",
                reason,
            })?;
        if self.network.max_polls == Some(0) {
            return Err(ConfigError::InvalidRetryPolicy {
                name: "association",
                reason: "max_polls must be at least 1",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSize;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = FileConfig::from_toml("").unwrap();

        assert_eq!(config.device.name, "Electric Meter");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topic, "home/meter/electric/image");
        assert_eq!(config.broker.buffer_size, 32768);
        assert_eq!(config.schedule.capture_interval_ms, 300_000);
        assert_eq!(config.schedule.loop_delay_ms, 100);
        assert_eq!(
            config.schedule.reconnect.delay_after(1),
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.capture.frame_size, FrameSize::Svga);
        assert_eq!(config.capture.jpeg_quality, 10);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = FileConfig::from_toml(
            r#"
            [device]
            name = "Gas Meter"

            [capture]
            frame_size = "vga"
            jpeg_quality = 12

            [network]
            ssid = "home"
            password = "secret"

            [broker]
            host = "10.0.0.2"
            username = "cam"
            password = "pw"
            topic = "home/meter/gas/image"
            client_id_source = "hardware"

            [schedule]
            capture_interval_ms = 60000
            reconnect = { kind = "fixed", delay_ms = 1000, max_attempts = 10 }
            "#,
        )
        .unwrap();

        assert_eq!(config.device.name, "Gas Meter");
        assert_eq!(config.capture.frame_size, FrameSize::Vga);
        assert_eq!(config.capture.fb_count, 1);
        assert_eq!(config.network.ssid, "home");
        assert_eq!(config.broker.client_id_source, ClientIdSource::Hardware);
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.schedule.capture_interval_ms, 60_000);
        assert_eq!(config.schedule.reconnect.max_attempts(), Some(10));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let result = FileConfig::from_toml("[broker]\ntopic = \"home/meter/#\"");
        assert!(matches!(result, Err(ConfigError::InvalidTopic(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = FileConfig::from_toml("[schedule]\ncapture_interval_ms = 0");
        assert!(matches!(result, Err(ConfigError::InvalidInterval)));
    }

    #[test]
    fn test_zero_loop_delay_rejected() {
        let result = FileConfig::from_toml("[schedule]\nloop_delay_ms = 0");
        assert!(matches!(
            result,
            Err(ConfigError::ZeroDelay("schedule.loop_delay_ms"))
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = FileConfig::from_toml("[network]\npoll_interval_ms = 0");
        assert!(matches!(
            result,
            Err(ConfigError::ZeroDelay("network.poll_interval_ms"))
        ));
    }

    #[test]
    fn test_partial_pin_table_keeps_remaining_pins() {
        let config = FileConfig::from_toml("[capture.pins]\nxclk = 15").unwrap();

        let defaults = crate::capture::CameraPins::ai_thinker();
        assert_eq!(config.capture.pins.xclk, 15);
        assert_eq!(config.capture.pins.pwdn, defaults.pwdn);
        assert_eq!(config.capture.pins.data, defaults.data);
        assert_eq!(config.capture.pins.pclk, defaults.pclk);
    }

    #[test]
    fn test_malformed_file_rejected() {
        let result = FileConfig::from_toml("[broker\nport = 1");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_association_policy_from_network_config() {
        let network = NetworkConfig {
            max_polls: Some(4),
            ..Default::default()
        };
        let policy = network.association_policy();
        assert_eq!(policy.max_attempts(), Some(4));
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(500)));
    }
}

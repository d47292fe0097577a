//! Configuration types for the streaming speech pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable prefix for overrides, e.g. `COSYVOICE_SAMPLE_RATE`.
pub const ENV_PREFIX: &str = "COSYVOICE";

/// Client and playback configuration.
///
/// Sample rate and frame size are fixed per build: the synthesis service and
/// the output device must agree on them, nothing is negotiated at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Synthesis endpoint receiving the form POST
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Speaker key sent when the caller does not pick one
    #[serde(default = "default_speaker")]
    pub speaker: String,

    /// PCM sample rate of the synthesized stream (16-bit mono)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Bytes per audio frame handed from the network to the device
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// Bytes buffered before playback starts
    #[serde(default = "default_pre_roll_bytes")]
    pub pre_roll_bytes: usize,

    /// Device buffer size as a multiple of the device minimum
    #[serde(default = "default_buffer_multiple")]
    pub buffer_multiple: usize,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Settle time after the device drains, before it is stopped
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// How long a device write may block without progress
    #[serde(default = "default_write_stall_ms")]
    pub write_stall_ms: u64,

    /// Frames queued between the network reader and the device writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            speaker: default_speaker(),
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
            pre_roll_bytes: default_pre_roll_bytes(),
            buffer_multiple: default_buffer_multiple(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
            drain_grace_ms: default_drain_grace_ms(),
            write_stall_ms: default_write_stall_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    /// Load configuration from defaults, an optional TOML file and the
    /// environment, in that order of precedence (later wins).
    ///
    /// Without an explicit path the per-user file is used when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    debug!("Looking for configuration in {:?}", path);
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        let config: StreamConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make streaming impossible.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::ConfigError("sample_rate must be positive".into()));
        }
        if self.frame_size == 0 || self.frame_size % 2 != 0 {
            return Err(Error::ConfigError(format!(
                "frame_size must be a positive whole number of 16-bit samples, got {}",
                self.frame_size
            )));
        }
        if self.buffer_multiple == 0 {
            return Err(Error::ConfigError("buffer_multiple must be positive".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::ConfigError("channel_capacity must be positive".into()));
        }
        if self.speaker.trim().is_empty() {
            return Err(Error::ConfigError("speaker must not be empty".into()));
        }
        reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::ConfigError(format!("invalid endpoint {:?}: {}", self.endpoint, e)))?;
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn write_stall(&self) -> Duration {
        Duration::from_millis(self.write_stall_ms)
    }
}

/// Per-user configuration file, e.g. `~/.config/cosyvoice/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cosyvoice").join("config.toml"))
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/tts".to_string()
}

fn default_speaker() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    24000
}

fn default_frame_size() -> usize {
    // 100 ms of 16-bit mono at 24 kHz
    4800
}

fn default_pre_roll_bytes() -> usize {
    19200
}

fn default_buffer_multiple() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_drain_grace_ms() -> u64 {
    100
}

fn default_write_stall_ms() -> u64 {
    2000
}

fn default_channel_capacity() -> usize {
    8
}

/// Reference synthesis server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Milliseconds of audio rendered per character of text
    #[serde(default = "default_ms_per_char")]
    pub ms_per_char: u32,

    /// Smallest body chunk written to the socket
    #[serde(default = "default_min_chunk")]
    pub min_chunk_bytes: usize,

    /// Largest body chunk written to the socket
    #[serde(default = "default_max_chunk")]
    pub max_chunk_bytes: usize,

    /// Delay between chunks, simulating synthesis pace
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sample_rate: default_sample_rate(),
            ms_per_char: default_ms_per_char(),
            min_chunk_bytes: default_min_chunk(),
            max_chunk_bytes: default_max_chunk(),
            chunk_interval_ms: default_chunk_interval_ms(),
        }
    }
}

impl ServerConfig {
    /// Load server settings from an optional TOML file and `COSYVOICE_SERVER_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: ServerConfig = builder
            .add_source(
                config::Environment::with_prefix(&format!("{}_SERVER", ENV_PREFIX))
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if config.min_chunk_bytes == 0 || config.min_chunk_bytes > config.max_chunk_bytes {
            return Err(Error::ConfigError(format!(
                "chunk bounds must satisfy 0 < min <= max, got {}..={}",
                config.min_chunk_bytes, config.max_chunk_bytes
            )));
        }
        if config.sample_rate == 0 {
            return Err(Error::ConfigError("sample_rate must be positive".into()));
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ms_per_char() -> u32 {
    120
}

fn default_min_chunk() -> usize {
    1
}

fn default_max_chunk() -> usize {
    8192
}

fn default_chunk_interval_ms() -> u64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.frame_size % 2, 0);
    }

    #[test]
    fn test_odd_frame_size_rejected() {
        let config = StreamConfig {
            frame_size: 4801,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let config = StreamConfig {
            endpoint: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StreamConfig = toml::from_str(
            r#"
            endpoint = "http://tts.local:50000/stream"
            sample_rate = 22050
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "http://tts.local:50000/stream");
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.frame_size, default_frame_size());
        assert_eq!(config.read_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_toml_output_parses_back() {
        let config = StreamConfig {
            pre_roll_bytes: 0,
            ..Default::default()
        };
        let rendered = config.to_toml().unwrap();
        let parsed: StreamConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_explicit_file() {
        let path = std::env::temp_dir()
            .join(format!("cosyvoice-test-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "frame_size = 3200\npre_roll_bytes = 6400\n").unwrap();

        let config = StreamConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.frame_size, 3200);
        assert_eq!(config.pre_roll_bytes, 6400);
    }
}

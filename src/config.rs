//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, BIRDNET_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_STREAM__WINDOW_SECONDS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names
//! containing underscores (`window_seconds`) survive the mapping.

use crate::audio::format::PcmFormat;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, auth, stream, detector, upload)
/// keeps each concern readable and lets the session take only the part it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub stream: StreamConfig,
    pub detector: DetectorConfig,
    pub upload: UploadConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Shared credential for the streaming endpoint and the prediction API.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_key: String,
}

// Keep the key out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

/// Realtime streaming session settings.
///
/// ## Fields:
/// - `sample_rate` / `channels` / `sample_width`: Raw PCM layout clients send
/// - `window_seconds`: Audio duration between analysis boundaries
/// - `init_timeout_secs`: How long a client has to send its init payload
/// - `poll_interval_ms`: How often the receive loop wakes up to check the session timeout
/// - `default_timeout_secs` / `min_timeout_secs`: Session duration budget when the client
///   does not send one, and the smallest budget it may ask for
/// - `default_min_confidence`: Confidence floor when the client does not send one
/// - `inbound_queue`: Frames buffered between the socket and the session task
/// - `max_frame_bytes`: Largest WebSocket message accepted, after reassembling fragments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
    pub window_seconds: u32,
    pub init_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub default_timeout_secs: f64,
    pub min_timeout_secs: f64,
    pub default_min_confidence: f64,
    pub inbound_queue: usize,
    pub max_frame_bytes: usize,
}

/// External detection engine settings.
///
/// ## Fields:
/// - `command`: Program implementing the engine contract (see `detection::detector`)
/// - `args`: Leading arguments, e.g. a script path for an interpreter
/// - `temp_dir`: Where uploads and stream windows are written for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub temp_dir: PathBuf,
}

/// One-shot prediction endpoint limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted request body in bytes
    pub max_bytes: usize,

    /// Requests allowed per client IP per minute
    pub requests_per_minute: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            auth: AuthConfig {
                api_key: String::new(),  // Must be provided (BIRDNET_API_KEY)
            },
            stream: StreamConfig {
                sample_rate: 48000,        // 48kHz
                channels: 1,               // Mono
                sample_width: 2,           // 16-bit
                window_seconds: 3,         // 288,000 bytes per window
                init_timeout_secs: 10,
                poll_interval_ms: 1000,
                default_timeout_secs: 30.0,
                min_timeout_secs: 1.0,
                default_min_confidence: 0.25,
                inbound_queue: 4,
                max_frame_bytes: 16 * 1024 * 1024,  // 16MB
            },
            detector: DetectorConfig {
                command: "birdnet-detect".to_string(),
                args: Vec::new(),
                temp_dir: env::temp_dir().join("birdnet_uploads"),
            },
            upload: UploadConfig {
                max_bytes: 50 * 1024 * 1024,  // 50MB
                requests_per_minute: 10,
            },
        }
    }
}

impl StreamConfig {
    /// PCM layout clients are expected to stream.
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat::new(self.sample_rate, self.channels, self.sample_width)
    }

    /// Byte length of one analysis window increment.
    pub fn window_bytes(&self) -> usize {
        self.pcm_format().window_bytes(self.window_seconds)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_DETECTOR__COMMAND=/opt/birdnet/detect`: Override the engine program
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `BIRDNET_API_KEY=...`: The shared credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("detector.args"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("BIRDNET_API_KEY") {
            settings = settings.set_override("auth.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching these at startup gives a clear message instead of a session
    /// that misbehaves at runtime (a zero window would fire forever, a zero
    /// poll interval would spin).
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.auth.api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "API key is not set (set BIRDNET_API_KEY or APP_AUTH__API_KEY)"
            ));
        }

        self.stream
            .pcm_format()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid stream format: {}", e))?;

        if self.stream.window_seconds == 0 {
            return Err(anyhow::anyhow!("Window duration must be greater than 0"));
        }

        if self.stream.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        if self.stream.inbound_queue == 0 {
            return Err(anyhow::anyhow!("Inbound queue must hold at least one frame"));
        }

        if self.stream.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum frame size must be greater than 0"));
        }

        if !(self.stream.min_timeout_secs > 0.0
            && self.stream.default_timeout_secs >= self.stream.min_timeout_secs)
        {
            return Err(anyhow::anyhow!(
                "Default session timeout ({}s) must be at least the minimum ({}s), which must be positive",
                self.stream.default_timeout_secs,
                self.stream.min_timeout_secs
            ));
        }

        if !(0.0..=1.0).contains(&self.stream.default_min_confidence) {
            return Err(anyhow::anyhow!("Default confidence floor must be between 0 and 1"));
        }

        if self.detector.command.trim().is_empty() {
            return Err(anyhow::anyhow!("Detector command cannot be empty"));
        }

        if self.upload.max_bytes == 0 {
            return Err(anyhow::anyhow!("Upload size limit must be greater than 0"));
        }

        if self.upload.requests_per_minute == 0 {
            return Err(anyhow::anyhow!("Rate limit must allow at least one request per minute"));
        }

        Ok(())
    }
}

//! Client configuration
//!
//! Defaults are compiled in from `config.toml`. A `.env` file and the process
//! environment can override the API location and provide the speech API key.

use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroize;

/// Environment variable overriding `api.base_url`
const API_URL_ENV: &str = "CHANT_API_URL";

/// Environment variable holding the realtime transcription API key
const SPEECH_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid API base URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Full client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub room: RoomConfig,
    pub channel: ChannelConfig,
    pub chant: ChantConfig,
    pub order: OrderConfig,
    pub speech: SpeechConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    /// Number of participants needed before the room locks
    pub required_peers: u32,
}

/// Reconnect and heartbeat tuning for WebSocket channels
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub connect_timeout_secs: u64,
}

impl ChannelConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChantConfig {
    /// Mean volume a capture window must reach to succeed
    pub volume_threshold: f32,
    pub capture_duration_secs: u64,
    pub sample_interval_ms: u64,
    pub success_dwell_secs: u64,
}

impl ChantConfig {
    pub fn capture_duration(&self) -> Duration {
        Duration::from_secs(self.capture_duration_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn success_dwell(&self) -> Duration {
        Duration::from_secs(self.success_dwell_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    pub loading_dwell_secs: u64,
    pub error_dwell_secs: u64,
    pub poll_interval_secs: u64,
    pub polls_until_ready: u32,
}

#[derive(Clone, Deserialize)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Language hint for transcription (e.g. "ja", "en")
    pub language: String,
    /// Never read from config.toml, only from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("enabled", &self.enabled)
            .field("language", &self.language)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for SpeechConfig {
    fn drop(&mut self) {
        if let Some(key) = self.api_key.as_mut() {
            key.zeroize();
        }
    }
}

impl Config {
    /// Parse the embedded defaults without consulting the environment
    pub fn embedded() -> Result<Self, ConfigError> {
        const CONFIG_TOML: &str = include_str!("../config.toml");
        Ok(toml::from_str(CONFIG_TOML)?)
    }

    /// Load the embedded defaults, then apply `.env` and environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::embedded()?;

        if let Err(e) = dotenvy::dotenv() {
            // A missing .env file is the normal case
            if !e.not_found() {
                warn!("Failed to read .env file: {}", e);
            }
        }

        if let Ok(url) = std::env::var(API_URL_ENV) {
            info!(base_url = %url, "API base URL overridden from environment");
            config.api.base_url = url;
        }
        config.speech.api_key = std::env::var(SPEECH_API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty());

        // Fail early rather than at the first request
        url::Url::parse(&config.api.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: config.api.base_url.clone(),
            source,
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = Config::embedded().unwrap();
        assert_eq!(config.room.required_peers, 3);
        assert_eq!(config.chant.volume_threshold, 0.5);
        assert_eq!(config.chant.capture_duration(), Duration::from_secs(10));
        assert_eq!(config.chant.sample_interval(), Duration::from_millis(200));
        assert_eq!(config.channel.base_delay(), Duration::from_millis(3000));
        assert_eq!(config.channel.max_delay(), Duration::from_millis(30000));
        assert_eq!(config.channel.max_attempts, 10);
        assert_eq!(config.order.polls_until_ready, 3);
        assert!(config.speech.api_key.is_none());
    }

    #[test]
    fn test_speech_config_debug_redacts_key() {
        let mut config = Config::embedded().unwrap();
        config.speech.api_key = Some("sk-secret".to_string());
        let debug = format!("{:?}", config.speech);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}

//! Configuration management
//!
//! Provider chains are read from a TOML file:
//!
//! ```toml
//! [tts]
//! max_rounds = 2
//!
//! [[tts.providers]]
//! provider = "elevenlabs"
//! api_key = "..."
//! voice_id = "..."
//!
//! [[tts.providers]]
//! provider = "cartesia"
//! api_key = "..."
//! model_id = "sonic-2"
//! voice_id = "..."
//! retry = { delay_ms = 500, max_retry = 5 }
//!
//! [[stt.providers]]
//! provider = "elevenlabs"
//! api_key = "..."
//! region = "eu"
//! ```
//!
//! Order matters: the first provider is tried first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::adapter::retry::{RetryPolicy, DEFAULT_MAX_RETRY, DEFAULT_RETRY_DELAY};
use crate::error::RelayError;
use crate::fallback::FallbackOptions;
use crate::providers::{
    cartesia, elevenlabs, elevenlabs_stt, CartesiaOptions, ElevenLabsOptions,
    ElevenLabsSttOptions, SttFactory, TtsFactory,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Text-to-speech provider chain
    #[serde(default)]
    pub tts: ChainConfig<TtsProviderConfig>,
    /// Speech-to-text provider chain
    #[serde(default)]
    pub stt: ChainConfig<SttProviderConfig>,
}

/// An ordered fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de>"))]
pub struct ChainConfig<P> {
    /// Full passes over the chain before giving up; unset cycles forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(default)]
    pub providers: Vec<P>,
}

impl<P> Default for ChainConfig<P> {
    fn default() -> Self {
        Self {
            max_rounds: None,
            providers: Vec::new(),
        }
    }
}

impl<P> ChainConfig<P> {
    pub fn fallback_options(&self) -> FallbackOptions {
        FallbackOptions {
            max_rounds: self.max_rounds,
        }
    }
}

/// Reconnect settings of one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Wait before each reconnect attempt
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Consecutive failed attempts tolerated before switching provider
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_max_retry() -> u32 {
    DEFAULT_MAX_RETRY
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
            max_retry: default_max_retry(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.delay_ms),
            max_retry: self.max_retry,
        }
    }
}

/// A text-to-speech provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum TtsProviderConfig {
    Cartesia(CartesiaOptions),
    ElevenLabs(ElevenLabsOptions),
}

impl TtsProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            TtsProviderConfig::Cartesia(_) => "cartesia",
            TtsProviderConfig::ElevenLabs(_) => "elevenlabs",
        }
    }

    pub fn factory(&self) -> Result<TtsFactory, RelayError> {
        match self {
            TtsProviderConfig::Cartesia(options) => cartesia::factory(options.clone()),
            TtsProviderConfig::ElevenLabs(options) => elevenlabs::factory(options.clone()),
        }
    }
}

/// A speech-to-text provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SttProviderConfig {
    ElevenLabs(ElevenLabsSttOptions),
}

impl SttProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            SttProviderConfig::ElevenLabs(_) => "elevenlabs",
        }
    }

    pub fn factory(&self) -> Result<SttFactory, RelayError> {
        match self {
            SttProviderConfig::ElevenLabs(options) => elevenlabs_stt::factory(options.clone()),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid configuration")
    }

    /// Adapter factories of the TTS chain, in order
    pub fn tts_factories(&self) -> Result<Vec<TtsFactory>> {
        self.tts
            .providers
            .iter()
            .enumerate()
            .map(|(i, provider)| {
                provider
                    .factory()
                    .with_context(|| format!("Invalid tts provider #{} ({})", i, provider.name()))
            })
            .collect()
    }

    /// Adapter factories of the STT chain, in order
    pub fn stt_factories(&self) -> Result<Vec<SttFactory>> {
        self.stt
            .providers
            .iter()
            .enumerate()
            .map(|(i, provider)| {
                provider
                    .factory()
                    .with_context(|| format!("Invalid stt provider #{} ({})", i, provider.name()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::elevenlabs_stt::Region;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [tts]
        max_rounds = 2

        [[tts.providers]]
        provider = "elevenlabs"
        api_key = "el-key"
        voice_id = "voice-a"

        [[tts.providers]]
        provider = "cartesia"
        api_key = "ca-key"
        model_id = "sonic-2"
        voice_id = "voice-b"
        speed = "fast"
        retry = { delay_ms = 250, max_retry = 5 }

        [[stt.providers]]
        provider = "elevenlabs"
        api_key = "stt-key"
        region = "eu"
    "#;

    #[test]
    fn test_parse_chains_in_order() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let names: Vec<&str> = config.tts.providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["elevenlabs", "cartesia"]);
        assert_eq!(config.tts.fallback_options().max_rounds, Some(2));
        assert_eq!(config.stt.fallback_options().max_rounds, None);

        match &config.stt.providers[0] {
            SttProviderConfig::ElevenLabs(options) => {
                assert_eq!(options.region, Region::Eu);
                assert_eq!(options.sample_rate, 16000);
            }
        }
    }

    #[test]
    fn test_retry_defaults_and_overrides() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        match (&config.tts.providers[0], &config.tts.providers[1]) {
            (TtsProviderConfig::ElevenLabs(el), TtsProviderConfig::Cartesia(ca)) => {
                assert_eq!(el.retry.policy(), RetryPolicy::default());
                assert_eq!(ca.retry.policy().delay, Duration::from_millis(250));
                assert_eq!(ca.retry.policy().max_retry, 5);
            }
            other => panic!("unexpected providers: {:?}", other),
        }
    }

    #[test]
    fn test_factories_built_for_every_provider() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.tts_factories().unwrap().len(), 2);
        assert_eq!(config.stt_factories().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[tts.providers]]
            provider = "acme"
            api_key = "x"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }

    #[test]
    fn test_empty_config_has_empty_chains() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.tts.providers.is_empty());
        assert!(config.stt_factories().unwrap().is_empty());
    }

    #[test]
    fn test_chain_without_providers_table() {
        let config = Config::from_toml_str("[tts]\nmax_rounds = 2\n").unwrap();
        assert_eq!(config.tts.max_rounds, Some(2));
        assert!(config.tts.providers.is_empty());
        assert_eq!(config.tts.fallback_options().max_rounds, Some(2));
    }

    #[test]
    fn test_debug_redacts_api_keys() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("el-key"));
        assert!(!debug.contains("ca-key"));
        assert!(!debug.contains("stt-key"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.tts.providers.len(), 2);

        let missing = Config::load(file.path().with_extension("missing")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));
    }
}

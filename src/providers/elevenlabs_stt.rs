//! ElevenLabs realtime STT
//!
//! Audio goes up as base64 `input_audio_chunk` messages. With the manual
//! commit strategy the end of input is an empty chunk with `commit: true`;
//! the provider answers with a `committed_transcript`, which is both the
//! transcript output and the acknowledgement that the utterance was consumed.
//! With voice activity detection, transcripts committed before the end of
//! input are forwarded but the audio stays queued for replay. Partial
//! transcripts are not forwarded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use url::Url;

use super::{adapter_factory, redact, SttFactory};
use crate::adapter::{
    ChunkingPolicy, CompletionCorrection, Eager, Epoch, Inbound, Protocol, ProviderSignal,
};
use crate::config::RetryConfig;
use crate::error::{ProtocolError, RelayError};
use crate::transport::{Connector, Frame, WsConnector};

const DEFAULT_MODEL_ID: &str = "scribe_v2_realtime";
const DEFAULT_SAMPLE_RATE: u32 = 16000;

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

/// Regional API host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
    In,
}

impl Region {
    pub fn host(self) -> &'static str {
        match self {
            Region::Us => "api.elevenlabs.io",
            Region::Eu => "api.eu.residency.elevenlabs.io",
            Region::In => "api.in.residency.elevenlabs.io",
        }
    }
}

/// When the provider finalizes a transcript
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStrategy {
    /// Only on an explicit commit (end of input)
    #[default]
    Manual,
    /// Whenever voice activity detection sees the speaker pause
    Vad,
}

impl CommitStrategy {
    fn as_str(self) -> &'static str {
        match self {
            CommitStrategy::Manual => "manual",
            CommitStrategy::Vad => "vad",
        }
    }
}

/// ElevenLabs STT connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ElevenLabsSttOptions {
    pub api_key: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Sample rate of the raw 16-bit PCM input
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub commit_strategy: CommitStrategy,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ElevenLabsSttOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: default_model_id(),
            language: None,
            sample_rate: default_sample_rate(),
            commit_strategy: CommitStrategy::default(),
            region: Region::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn endpoint_url(&self) -> Result<Url, RelayError> {
        let mut url = Url::parse(&format!(
            "wss://{}/v1/speech-to-text/realtime",
            self.region.host()
        ))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model_id", &self.model_id)
                .append_pair("audio_format", &format!("pcm_{}", self.sample_rate))
                .append_pair("commit_strategy", self.commit_strategy.as_str());
            if let Some(language) = &self.language {
                query.append_pair("language_code", language);
            }
        }
        Ok(url)
    }
}

impl fmt::Debug for ElevenLabsSttOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsSttOptions")
            .field("api_key", &redact(&self.api_key))
            .field("model_id", &self.model_id)
            .field("language", &self.language)
            .field("sample_rate", &self.sample_rate)
            .field("commit_strategy", &self.commit_strategy)
            .field("region", &self.region)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Adapter factory over the ElevenLabs realtime endpoint
pub fn factory(options: ElevenLabsSttOptions) -> Result<SttFactory, RelayError> {
    let connector = WsConnector::new(options.endpoint_url()?)
        .with_header("xi-api-key", options.api_key.clone());
    Ok(factory_over(options, Arc::new(connector)))
}

/// Adapter factory over an arbitrary connector
pub fn factory_over(options: ElevenLabsSttOptions, connector: Arc<dyn Connector>) -> SttFactory {
    let retry = options.retry.policy();
    adapter_factory(connector, retry, move || ElevenLabsSttProtocol::new(options.clone()))
}

#[derive(Serialize)]
struct InputAudioChunk {
    message_type: &'static str,
    audio_base_64: String,
    commit: bool,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct SttMessage {
    message_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    error: Option<String>,
}

/// ElevenLabs STT framing
#[derive(Debug, Clone)]
pub struct ElevenLabsSttProtocol {
    options: ElevenLabsSttOptions,
}

impl ElevenLabsSttProtocol {
    pub fn new(options: ElevenLabsSttOptions) -> Self {
        Self { options }
    }

    fn audio(&self, audio: &[u8], commit: bool) -> Result<Frame, ProtocolError> {
        Ok(Frame::json(&InputAudioChunk {
            message_type: "input_audio_chunk",
            audio_base_64: STANDARD.encode(audio),
            commit,
            sample_rate: self.options.sample_rate,
        })?)
    }
}

impl Protocol for ElevenLabsSttProtocol {
    type Input = Vec<u8>;
    type Output = String;

    fn name(&self) -> &'static str {
        "elevenlabs-stt"
    }

    fn chunking(&self) -> Box<dyn ChunkingPolicy<Vec<u8>>> {
        Box::new(Eager)
    }

    fn correction(&self) -> Box<dyn CompletionCorrection> {
        Box::new(ProviderSignal)
    }

    fn correlates(&self) -> bool {
        false
    }

    fn encode_chunk(&self, _epoch: Epoch, chunk: &Vec<u8>) -> Result<Vec<Frame>, ProtocolError> {
        Ok(vec![self.audio(chunk, false)?])
    }

    fn encode_end(&self, _epoch: Epoch) -> Result<Vec<Frame>, ProtocolError> {
        Ok(vec![self.audio(&[], true)?])
    }

    // No abort message exists; the epoch bump discards what is still in flight
    fn encode_cancel(&self, _epoch: Epoch) -> Result<Vec<Frame>, ProtocolError> {
        Ok(Vec::new())
    }

    fn decode(&self, frame: Frame) -> Result<Vec<Inbound<String>>, ProtocolError> {
        let Frame::Text(text) = frame else {
            return Err(ProtocolError::UnexpectedFrame("binary"));
        };
        let message: SttMessage = serde_json::from_str(&text)?;
        Ok(match message.message_type.as_str() {
            "committed_transcript" => {
                let mut inbound = Vec::new();
                if !message.text.trim().is_empty() {
                    inbound.push(Inbound::Output {
                        epoch: None,
                        data: message.text,
                        echo: None,
                    });
                }
                inbound.push(Inbound::Acknowledged { epoch: None });
                inbound
            }
            "partial_transcript" => {
                trace!(text = %message.text, "partial transcript");
                Vec::new()
            }
            other => match message.error {
                Some(error) => vec![Inbound::Error {
                    epoch: None,
                    message: format!("{}: {}", other, error),
                }],
                None => Vec::new(),
            },
        })
    }
}

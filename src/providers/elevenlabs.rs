//! ElevenLabs stream-input TTS
//!
//! The socket serves one utterance at a time and has no correlation ids.
//! Text must arrive in whole words, so chunking is word-boundary; the end of
//! input is a flush frame, which also serves as the abort. ElevenLabs does not
//! reliably flag its last audio chunk, so completion is corrected from the
//! alignment characters it echoes back with each chunk.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{adapter_factory, collapse_whitespace, redact, TtsFactory};
use crate::adapter::{
    ChunkingPolicy, CompletionCorrection, EchoCorrection, Epoch, Inbound, Protocol, WordBoundary,
};
use crate::config::RetryConfig;
use crate::error::{ProtocolError, RelayError};
use crate::transport::{Connector, Frame, WsConnector};

const DEFAULT_ENDPOINT: &str = "wss://api.elevenlabs.io";
const DEFAULT_MODEL_ID: &str = "eleven_flash_v2_5";
const DEFAULT_OUTPUT_FORMAT: &str = "pcm_16000";

/// Seconds of silence after which ElevenLabs drops the socket
const INACTIVITY_TIMEOUT_SECS: u64 = 180;

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

/// Voice tuning sent with the connection and in the init frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// ElevenLabs TTS connection and voice settings
#[derive(Clone, Serialize, Deserialize)]
pub struct ElevenLabsOptions {
    pub api_key: String,
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_settings: Option<VoiceSettings>,
    /// Base URL; the voice path is appended
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ElevenLabsOptions {
    pub fn new(api_key: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            voice_id: voice_id.into(),
            model_id: default_model_id(),
            output_format: default_output_format(),
            language: None,
            voice_settings: None,
            endpoint: default_endpoint(),
            retry: RetryConfig::default(),
        }
    }

    pub fn endpoint_url(&self) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.endpoint)?
            .join(&format!("v1/text-to-speech/{}/stream-input", self.voice_id))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model_id", &self.model_id)
                .append_pair("output_format", &self.output_format)
                .append_pair("inactivity_timeout", &INACTIVITY_TIMEOUT_SECS.to_string());
            if let Some(settings) = &self.voice_settings {
                let settings = serde_json::to_string(settings).map_err(ProtocolError::from)?;
                query.append_pair("voice_settings", &settings);
            }
            if let Some(language) = &self.language {
                query.append_pair("language_code", language);
            }
        }
        Ok(url)
    }

    fn connector(&self) -> Result<WsConnector, RelayError> {
        Ok(WsConnector::new(self.endpoint_url()?).with_header("xi-api-key", self.api_key.clone()))
    }
}

impl fmt::Debug for ElevenLabsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsOptions")
            .field("api_key", &redact(&self.api_key))
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .field("language", &self.language)
            .field("voice_settings", &self.voice_settings)
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Adapter factory over the ElevenLabs WebSocket endpoint
pub fn factory(options: ElevenLabsOptions) -> Result<TtsFactory, RelayError> {
    let connector: Arc<dyn Connector> = Arc::new(options.connector()?);
    Ok(factory_over(options, connector))
}

/// Adapter factory over an arbitrary connector
pub fn factory_over(options: ElevenLabsOptions, connector: Arc<dyn Connector>) -> TtsFactory {
    let retry = options.retry.policy();
    adapter_factory(connector, retry, move || ElevenLabsProtocol::new(options.clone()))
}

#[derive(Serialize)]
struct InitMessage<'a> {
    text: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<&'a VoiceSettings>,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    try_trigger_generation: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    flush: bool,
}

#[derive(Deserialize)]
struct Alignment {
    #[serde(default)]
    chars: Vec<String>,
}

#[derive(Deserialize)]
struct AudioMessage {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    is_final: Option<bool>,
    #[serde(default)]
    alignment: Option<Alignment>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// ElevenLabs TTS framing
#[derive(Debug, Clone)]
pub struct ElevenLabsProtocol {
    options: ElevenLabsOptions,
}

impl ElevenLabsProtocol {
    pub fn new(options: ElevenLabsOptions) -> Self {
        Self { options }
    }

    fn flush_frame() -> Result<Frame, ProtocolError> {
        Ok(Frame::json(&TextMessage {
            text: " ",
            try_trigger_generation: false,
            flush: true,
        })?)
    }
}

impl Protocol for ElevenLabsProtocol {
    type Input = String;
    type Output = Vec<u8>;

    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    fn chunking(&self) -> Box<dyn ChunkingPolicy<String>> {
        Box::new(WordBoundary::new())
    }

    fn correction(&self) -> Box<dyn CompletionCorrection> {
        Box::new(EchoCorrection::new())
    }

    // Stream-input messages carry no context id
    fn correlates(&self) -> bool {
        false
    }

    fn prepare(&self, chunk: String) -> String {
        collapse_whitespace(&chunk)
    }

    fn open_frames(&self) -> Result<Vec<Frame>, ProtocolError> {
        let init = InitMessage {
            text: " ",
            voice_settings: self.options.voice_settings.as_ref(),
        };
        Ok(vec![Frame::json(&init)?])
    }

    fn keep_alive(&self) -> Option<(Duration, Frame)> {
        let period = Duration::from_secs(INACTIVITY_TIMEOUT_SECS - 1);
        Some((period, Frame::Text(r#"{"text":" "}"#.to_string())))
    }

    fn encode_chunk(&self, _epoch: Epoch, chunk: &String) -> Result<Vec<Frame>, ProtocolError> {
        let message = TextMessage {
            text: chunk,
            try_trigger_generation: true,
            flush: false,
        };
        Ok(vec![Frame::json(&message)?])
    }

    fn encode_end(&self, _epoch: Epoch) -> Result<Vec<Frame>, ProtocolError> {
        Ok(vec![Self::flush_frame()?])
    }

    fn encode_cancel(&self, _epoch: Epoch) -> Result<Vec<Frame>, ProtocolError> {
        Ok(vec![Self::flush_frame()?])
    }

    fn decode(&self, frame: Frame) -> Result<Vec<Inbound<Vec<u8>>>, ProtocolError> {
        let Frame::Text(text) = frame else {
            return Err(ProtocolError::UnexpectedFrame("binary"));
        };
        let message: AudioMessage = serde_json::from_str(&text)?;
        let mut inbound = Vec::new();

        if let Some(audio) = message.audio.filter(|a| !a.is_empty()) {
            inbound.push(Inbound::Output {
                epoch: None,
                data: STANDARD.decode(audio)?,
                echo: message.alignment.map(|a| a.chars.concat()),
            });
        }
        if message.is_final == Some(true) {
            inbound.push(Inbound::Done { epoch: None });
        }
        if let Some(error) = message.error {
            inbound.push(Inbound::Error {
                epoch: None,
                message: message.message.map_or(error.clone(), |m| format!("{}: {}", error, m)),
            });
        }
        Ok(inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn protocol() -> ElevenLabsProtocol {
        let mut options = ElevenLabsOptions::new("key", "voice-1");
        options.voice_settings = Some(VoiceSettings {
            stability: Some(0.5),
            similarity_boost: Some(0.75),
            ..Default::default()
        });
        ElevenLabsProtocol::new(options)
    }

    fn parse(frame: &Frame) -> Value {
        serde_json::from_str(frame.as_text().unwrap()).unwrap()
    }

    #[test]
    fn test_open_frame_carries_voice_settings() {
        let frames = protocol().open_frames().unwrap();
        assert_eq!(
            parse(&frames[0]),
            json!({"text": " ", "voice_settings": {"stability": 0.5, "similarity_boost": 0.75}})
        );
    }

    #[test]
    fn test_text_and_flush_frames() {
        let p = protocol();
        let chunk = p.encode_chunk(Epoch::new(1), &"Hello ".to_string()).unwrap();
        assert_eq!(parse(&chunk[0]), json!({"text": "Hello ", "try_trigger_generation": true}));

        let end = p.encode_end(Epoch::new(1)).unwrap();
        assert_eq!(parse(&end[0]), json!({"text": " ", "flush": true}));
        assert_eq!(p.encode_cancel(Epoch::new(1)).unwrap(), end);
        assert!(!p.correlates());
    }

    #[test]
    fn test_keep_alive_inside_inactivity_timeout() {
        let (period, frame) = protocol().keep_alive().unwrap();
        assert_eq!(period, Duration::from_secs(179));
        assert_eq!(parse(&frame), json!({"text": " "}));
    }

    #[test]
    fn test_decode_audio_with_alignment() {
        let frame = Frame::Text(
            json!({
                "audio": "AQI=",
                "isFinal": null,
                "alignment": {"chars": ["H", "i", " "], "charStartTimesMs": [0, 3, 5]}
            })
            .to_string(),
        );
        assert_eq!(
            protocol().decode(frame).unwrap(),
            vec![Inbound::Output {
                epoch: None,
                data: vec![1, 2],
                echo: Some("Hi ".into())
            }]
        );
    }

    #[test]
    fn test_decode_final_and_error() {
        let done = Frame::Text(r#"{"isFinal":true}"#.into());
        assert_eq!(protocol().decode(done).unwrap(), vec![Inbound::Done { epoch: None }]);

        let error = Frame::Text(r#"{"error":"quota_exceeded","message":"out of credits"}"#.into());
        assert_eq!(
            protocol().decode(error).unwrap(),
            vec![Inbound::Error {
                epoch: None,
                message: "quota_exceeded: out of credits".into()
            }]
        );
    }

    #[test]
    fn test_endpoint_url() {
        let mut options = ElevenLabsOptions::new("secret", "voice-1");
        options.language = Some("fr".into());
        let url = options.endpoint_url().unwrap();
        assert_eq!(url.path(), "/v1/text-to-speech/voice-1/stream-input");
        let query = url.query().unwrap();
        assert!(query.contains("model_id=eleven_flash_v2_5"));
        assert!(query.contains("output_format=pcm_16000"));
        assert!(query.contains("inactivity_timeout=180"));
        assert!(query.contains("language_code=fr"));
        assert!(!query.contains("secret"));
        assert!(!format!("{:?}", options).contains("secret"));
    }
}

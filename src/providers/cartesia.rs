//! Cartesia streaming TTS
//!
//! One WebSocket carries many generation contexts; every request is tagged
//! with a `context_id`, which is the adapter epoch. Text is sent eagerly with
//! `continue: true` and the utterance is closed by an empty transcript with
//! `continue: false`. Audio comes back as base64 `chunk` messages followed by
//! `done`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

use super::{adapter_factory, collapse_whitespace, redact, TtsFactory};
use crate::adapter::{
    ChunkingPolicy, CompletionCorrection, Eager, Epoch, Inbound, Protocol, ProviderSignal,
};
use crate::config::RetryConfig;
use crate::error::{ProtocolError, RelayError};
use crate::transport::{Connector, Frame, WsConnector};

const DEFAULT_ENDPOINT: &str = "wss://api.cartesia.ai/tts/websocket";
const DEFAULT_VERSION: &str = "2025-04-16";
const SAMPLE_RATE: u32 = 16000;

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CartesiaSpeed {
    Fast,
    Normal,
    Slow,
}

/// Cartesia connection and voice settings
#[derive(Clone, Serialize, Deserialize)]
pub struct CartesiaOptions {
    pub api_key: String,
    pub model_id: String,
    pub voice_id: String,
    /// Language code, e.g. "en"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<CartesiaSpeed>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Value of the `cartesia_version` query parameter
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl CartesiaOptions {
    pub fn new(
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: model_id.into(),
            voice_id: voice_id.into(),
            language: None,
            speed: None,
            endpoint: default_endpoint(),
            version: default_version(),
            retry: RetryConfig::default(),
        }
    }

    /// WebSocket URL; the API key travels in the query string
    pub fn endpoint_url(&self) -> Result<Url, RelayError> {
        Ok(Url::parse_with_params(
            &self.endpoint,
            &[
                ("api_key", self.api_key.as_str()),
                ("cartesia_version", self.version.as_str()),
            ],
        )?)
    }
}

impl fmt::Debug for CartesiaOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartesiaOptions")
            .field("api_key", &redact(&self.api_key))
            .field("model_id", &self.model_id)
            .field("voice_id", &self.voice_id)
            .field("language", &self.language)
            .field("speed", &self.speed)
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Adapter factory over the Cartesia WebSocket endpoint
pub fn factory(options: CartesiaOptions) -> Result<TtsFactory, RelayError> {
    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(options.endpoint_url()?));
    Ok(factory_over(options, connector))
}

/// Adapter factory over an arbitrary connector
pub fn factory_over(options: CartesiaOptions, connector: Arc<dyn Connector>) -> TtsFactory {
    let retry = options.retry.policy();
    adapter_factory(connector, retry, move || CartesiaProtocol::new(options.clone()))
}

#[derive(Serialize)]
struct VoiceSpec<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(Serialize)]
struct OutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

const OUTPUT_FORMAT: OutputFormat = OutputFormat {
    container: "raw",
    encoding: "pcm_s16le",
    sample_rate: SAMPLE_RATE,
};

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: VoiceSpec<'a>,
    output_format: &'a OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<CartesiaSpeed>,
    context_id: String,
    #[serde(rename = "continue")]
    more: bool,
}

#[derive(Serialize)]
struct CancelRequest {
    context_id: String,
    cancel: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CartesiaResponse {
    Chunk {
        context_id: String,
        data: String,
    },
    Done {
        context_id: String,
    },
    Error {
        #[serde(default)]
        context_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Cartesia framing
#[derive(Debug, Clone)]
pub struct CartesiaProtocol {
    options: CartesiaOptions,
}

impl CartesiaProtocol {
    pub fn new(options: CartesiaOptions) -> Self {
        Self { options }
    }

    fn generation(&self, epoch: Epoch, transcript: &str, more: bool) -> Result<Frame, ProtocolError> {
        let request = GenerationRequest {
            model_id: &self.options.model_id,
            transcript,
            voice: VoiceSpec {
                mode: "id",
                id: &self.options.voice_id,
            },
            output_format: &OUTPUT_FORMAT,
            language: self.options.language.as_deref(),
            speed: self.options.speed,
            context_id: epoch.to_string(),
            more,
        };
        Ok(Frame::json(&request)?)
    }
}

impl Protocol for CartesiaProtocol {
    type Input = String;
    type Output = Vec<u8>;

    fn name(&self) -> &'static str {
        "cartesia"
    }

    fn chunking(&self) -> Box<dyn ChunkingPolicy<String>> {
        Box::new(Eager)
    }

    fn correction(&self) -> Box<dyn CompletionCorrection> {
        Box::new(ProviderSignal)
    }

    fn prepare(&self, chunk: String) -> String {
        collapse_whitespace(&chunk)
    }

    fn encode_chunk(&self, epoch: Epoch, chunk: &String) -> Result<Vec<Frame>, ProtocolError> {
        Ok(vec![self.generation(epoch, chunk, true)?])
    }

    fn encode_end(&self, epoch: Epoch) -> Result<Vec<Frame>, ProtocolError> {
        Ok(vec![self.generation(epoch, "", false)?])
    }

    fn encode_cancel(&self, epoch: Epoch) -> Result<Vec<Frame>, ProtocolError> {
        let request = CancelRequest {
            context_id: epoch.to_string(),
            cancel: true,
        };
        Ok(vec![Frame::json(&request)?])
    }

    fn decode(&self, frame: Frame) -> Result<Vec<Inbound<Vec<u8>>>, ProtocolError> {
        let Frame::Text(text) = frame else {
            return Err(ProtocolError::UnexpectedFrame("binary"));
        };
        Ok(match serde_json::from_str::<CartesiaResponse>(&text)? {
            CartesiaResponse::Chunk { context_id, data } => vec![Inbound::Output {
                epoch: Some(context_id.parse()?),
                data: STANDARD.decode(data)?,
                echo: None,
            }],
            CartesiaResponse::Done { context_id } => vec![Inbound::Done {
                epoch: Some(context_id.parse()?),
            }],
            CartesiaResponse::Error { context_id, error } => vec![Inbound::Error {
                epoch: context_id.map(|id| id.parse()).transpose()?,
                message: error.unwrap_or_else(|| "unknown error".to_string()),
            }],
            CartesiaResponse::Other => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn protocol() -> CartesiaProtocol {
        let mut options = CartesiaOptions::new("key", "sonic-2", "voice-1");
        options.language = Some("en".into());
        CartesiaProtocol::new(options)
    }

    fn parse(frames: Vec<Frame>) -> Value {
        assert_eq!(frames.len(), 1);
        serde_json::from_str(frames[0].as_text().unwrap()).unwrap()
    }

    #[test]
    fn test_encode_chunk() {
        let value = parse(protocol().encode_chunk(Epoch::new(4), &"Hello ".to_string()).unwrap());
        assert_eq!(
            value,
            json!({
                "model_id": "sonic-2",
                "transcript": "Hello ",
                "voice": {"mode": "id", "id": "voice-1"},
                "output_format": {"container": "raw", "encoding": "pcm_s16le", "sample_rate": 16000},
                "language": "en",
                "context_id": "4",
                "continue": true
            })
        );
    }

    #[test]
    fn test_encode_end_and_cancel() {
        let end = parse(protocol().encode_end(Epoch::new(2)).unwrap());
        assert_eq!(end["transcript"], "");
        assert_eq!(end["continue"], false);
        assert_eq!(end["context_id"], "2");

        let cancel = parse(protocol().encode_cancel(Epoch::new(2)).unwrap());
        assert_eq!(cancel, json!({"context_id": "2", "cancel": true}));
    }

    #[test]
    fn test_decode_chunk_and_done() {
        let chunk = Frame::Text(r#"{"type":"chunk","context_id":"3","data":"AQID","done":false}"#.into());
        assert_eq!(
            protocol().decode(chunk).unwrap(),
            vec![Inbound::Output {
                epoch: Some(Epoch::new(3)),
                data: vec![1, 2, 3],
                echo: None
            }]
        );

        let done = Frame::Text(r#"{"type":"done","context_id":"3"}"#.into());
        assert_eq!(
            protocol().decode(done).unwrap(),
            vec![Inbound::Done {
                epoch: Some(Epoch::new(3))
            }]
        );
    }

    #[test]
    fn test_decode_error_and_unknown() {
        let error = Frame::Text(r#"{"type":"error","context_id":"1","error":"bad voice"}"#.into());
        assert_eq!(
            protocol().decode(error).unwrap(),
            vec![Inbound::Error {
                epoch: Some(Epoch::new(1)),
                message: "bad voice".into()
            }]
        );
        let timestamps = Frame::Text(r#"{"type":"timestamps","context_id":"1"}"#.into());
        assert!(protocol().decode(timestamps).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        let foreign = Frame::Text(r#"{"type":"done","context_id":"other"}"#.into());
        assert!(matches!(
            protocol().decode(foreign),
            Err(ProtocolError::InvalidContext(_))
        ));
        assert!(matches!(
            protocol().decode(Frame::Text("{".into())),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            protocol().decode(Frame::Binary(vec![0])),
            Err(ProtocolError::UnexpectedFrame(_))
        ));
    }

    #[test]
    fn test_prepare_collapses_line_breaks() {
        assert_eq!(protocol().prepare("Hi\n\nthere".into()), "Hi there");
    }

    #[test]
    fn test_endpoint_url_and_redaction() {
        let options = CartesiaOptions::new("secret-key", "sonic-2", "voice-1");
        let url = options.endpoint_url().unwrap();
        assert_eq!(url.host_str(), Some("api.cartesia.ai"));
        assert!(url.query().unwrap().contains("api_key=secret-key"));
        assert!(url.query().unwrap().contains("cartesia_version=2025-04-16"));
        assert!(!format!("{:?}", options).contains("secret-key"));
    }
}

//! Concrete providers
//!
//! Each provider supplies a [`Protocol`] (its framing), an options struct
//! read from configuration, and factories that build adapters over either
//! the real WebSocket endpoint or any other [`Connector`].
//!
//! - [`cartesia`]: Cartesia streaming TTS
//! - [`elevenlabs`]: ElevenLabs stream-input TTS
//! - [`elevenlabs_stt`]: ElevenLabs realtime STT

pub mod cartesia;
pub mod elevenlabs;
pub mod elevenlabs_stt;

use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::adapter::{AdapterFactory, Protocol, ProviderAdapter, RetryPolicy};
use crate::transport::Connector;

pub use cartesia::{CartesiaOptions, CartesiaProtocol};
pub use elevenlabs::{ElevenLabsOptions, ElevenLabsProtocol};
pub use elevenlabs_stt::{ElevenLabsSttOptions, ElevenLabsSttProtocol};

/// Factory of text-to-speech adapters
pub type TtsFactory = AdapterFactory<String, Vec<u8>>;

/// Factory of speech-to-text adapters
pub type SttFactory = AdapterFactory<Vec<u8>, String>;

static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n ]+").unwrap());

/// Collapse runs of spaces and line breaks into a single space
pub fn collapse_whitespace(text: &str) -> String {
    LINE_BREAKS.replace_all(text, " ").into_owned()
}

/// Factory spawning a [`ProviderAdapter`] per call, each with a fresh protocol
pub fn adapter_factory<P, F>(
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    make_protocol: F,
) -> AdapterFactory<P::Input, P::Output>
where
    P: Protocol,
    F: Fn() -> P + Send + Sync + 'static,
{
    Box::new(move |context| {
        Box::new(ProviderAdapter::spawn(
            make_protocol(),
            Arc::clone(&connector),
            retry,
            context,
        ))
    })
}

/// Debug placeholder for secrets
pub(crate) fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

//! Voice Relay - resilient streaming bridge to voice providers
//!
//! Keeps TTS and STT streams alive across provider trouble:
//! - reconnects with a fixed delay and replays input the provider has not confirmed
//! - tags every utterance with an epoch so output of cancelled utterances is dropped
//! - chunks text on word boundaries for providers that need it
//! - rotates through a chain of providers, handing unconsumed input to the next one
//!
//! # Example
//!
//! ```ignore
//! use voice_relay::{event_channel, input_channel, Adapter, AdapterContext, AdapterEvent};
//! use voice_relay::{Config, FallbackAdapter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("relay.toml")?;
//!     let (sink, mut events) = event_channel();
//!     let mut tts = FallbackAdapter::new(
//!         config.tts_factories()?,
//!         config.tts.fallback_options(),
//!         AdapterContext::new(sink, tracing::info_span!("tts")),
//!     )?;
//!
//!     let (text, input) = input_channel();
//!     tts.start(input);
//!     text.push("Hello world.".to_string());
//!     text.end();
//!
//!     while let Some(AdapterEvent::Output(audio)) = events.recv().await {
//!         println!("{} bytes", audio.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod fallback;
pub mod providers;
pub mod stream;
pub mod transport;

// Re-export commonly used types for convenience
pub use adapter::{Adapter, AdapterContext, AdapterFactory, Epoch, ProviderAdapter};

pub use config::Config;

pub use error::{InputError, ProtocolError, RelayError};

pub use fallback::{FallbackAdapter, FallbackOptions};

pub use stream::{
    event_channel, from_chunks, input_channel, AdapterEvent, EventSink, Events, InputSender,
    InputStream, SttEvent, TtsEvent, Unconsumed,
};

pub use transport::{Connector, Frame, MemoryConnector, RemotePeer, Session, WsConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Resilient voice provider relay", NAME, VERSION)
}

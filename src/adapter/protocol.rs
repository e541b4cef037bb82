//! Provider framing
//!
//! A [`Protocol`] is everything provider specific about an adapter: how input
//! is chunked and framed, which frames open a connection, how to abort an
//! utterance and how provider frames map to [`Inbound`] messages. The
//! reconnect/backoff/replay machinery in the session driver is shared by all
//! of them.

use std::time::Duration;

use super::chunking::ChunkingPolicy;
use super::confirmation::CompletionCorrection;
use super::ledger::Payload;
use super::Epoch;
use crate::error::ProtocolError;
use crate::transport::Frame;

/// A decoded provider message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<O> {
    /// Output for an utterance; `echo` is the input text the provider says it consumed
    Output {
        epoch: Option<Epoch>,
        data: O,
        echo: Option<String>,
    },
    /// The provider committed what it received. Only input followed by the
    /// end marker counts as consumed; earlier commits (voice activity
    /// detection) leave the sent input in place for replay.
    Acknowledged { epoch: Option<Epoch> },
    /// The provider finished the utterance
    Done { epoch: Option<Epoch> },
    /// The provider reported an error for an utterance
    Error {
        epoch: Option<Epoch>,
        message: String,
    },
}

impl<O> Inbound<O> {
    /// Correlation id of the message; `None` for providers without one
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Inbound::Output { epoch, .. }
            | Inbound::Acknowledged { epoch }
            | Inbound::Done { epoch }
            | Inbound::Error { epoch, .. } => *epoch,
        }
    }
}

/// Provider-specific framing strategy
pub trait Protocol: Send + Sync + 'static {
    type Input: Payload;
    type Output: Send + 'static;

    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    fn chunking(&self) -> Box<dyn ChunkingPolicy<Self::Input>>;

    fn correction(&self) -> Box<dyn CompletionCorrection>;

    /// Normalize a chunk before it is chunked and recorded
    fn prepare(&self, chunk: Self::Input) -> Self::Input {
        chunk
    }

    /// Whether provider messages carry the utterance epoch. Providers that
    /// answer with `epoch: None` get a fresh connection whenever an utterance
    /// is abandoned, so late output cannot leak into the next one.
    fn correlates(&self) -> bool {
        true
    }

    /// Frames sent every time a connection opens
    fn open_frames(&self) -> Result<Vec<Frame>, ProtocolError> {
        Ok(Vec::new())
    }

    /// Frame sent periodically while the connection is open
    fn keep_alive(&self) -> Option<(Duration, Frame)> {
        None
    }

    fn encode_chunk(&self, epoch: Epoch, chunk: &Self::Input) -> Result<Vec<Frame>, ProtocolError>;

    /// End-of-input marker for an utterance
    fn encode_end(&self, epoch: Epoch) -> Result<Vec<Frame>, ProtocolError>;

    /// Abort frame for an utterance
    fn encode_cancel(&self, epoch: Epoch) -> Result<Vec<Frame>, ProtocolError>;

    fn decode(&self, frame: Frame) -> Result<Vec<Inbound<Self::Output>>, ProtocolError>;
}

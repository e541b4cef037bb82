//! Stream glue
//!
//! Adapts the push-based input and output conventions used by callers to the
//! adapter contract:
//!
//! - input is an [`InputStream`]: `Some(Ok(chunk))` is a chunk, `Some(Err(_))`
//!   is an upstream failure (treated as end of input), `None` is end of input
//! - output is an [`AdapterEvent`] delivered through an [`EventSink`] that the
//!   owner hands to the adapter at construction time
//!
//! Chunks may arrive at any size; nothing here assumes they line up with words
//! or audio frames.

use futures::channel::mpsc as push;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use tokio::sync::mpsc;

use crate::error::InputError;

/// A caller-supplied sequence of input chunks (text or audio)
pub type InputStream<T> = BoxStream<'static, Result<T, InputError>>;

/// Producer half of [`input_channel`]
pub struct InputSender<T> {
    tx: push::UnboundedSender<Result<T, InputError>>,
}

impl<T> InputSender<T> {
    /// Push a chunk. Returns false once the consuming side has gone away.
    pub fn push(&self, chunk: T) -> bool {
        self.tx.unbounded_send(Ok(chunk)).is_ok()
    }

    /// Signal an upstream failure; the consumer treats it as end of input.
    pub fn fail(self, error: InputError) {
        let _ = self.tx.unbounded_send(Err(error));
    }

    /// Signal end of input.
    pub fn end(self) {}
}

/// Create a push-based input stream
pub fn input_channel<T: Send + 'static>() -> (InputSender<T>, InputStream<T>) {
    let (tx, rx) = push::unbounded();
    (InputSender { tx }, rx.boxed())
}

/// A finished input stream made of the given chunks
pub fn from_chunks<T: Send + 'static>(chunks: Vec<T>) -> InputStream<T> {
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// Input an adapter could not confirm as processed when it gave up
pub struct Unconsumed<I> {
    /// Chunks already taken from the caller but not confirmed by the provider
    pub chunks: Vec<I>,
    /// The rest of the caller's stream, if it had not ended yet
    pub remainder: Option<InputStream<I>>,
}

impl<I: Send + 'static> Unconsumed<I> {
    pub fn new(chunks: Vec<I>, remainder: Option<InputStream<I>>) -> Self {
        Self { chunks, remainder }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.remainder.is_none()
    }

    /// Replay the unconsumed chunks followed by the remainder of the stream
    pub fn into_stream(self) -> InputStream<I> {
        let head = stream::iter(self.chunks.into_iter().map(Ok));
        match self.remainder {
            Some(rest) => head.chain(rest).boxed(),
            None => head.boxed(),
        }
    }
}

impl<I: fmt::Debug> fmt::Debug for Unconsumed<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unconsumed")
            .field("chunks", &self.chunks)
            .field("remainder", &self.remainder.is_some())
            .finish()
    }
}

/// Events produced by adapters and by the fallback orchestrator
#[derive(Debug)]
pub enum AdapterEvent<I, O> {
    /// Output from the provider (audio bytes or transcript text)
    Output(O),
    /// The current utterance closed
    Finished,
    /// The adapter gave up; carries whatever input was not confirmed
    Failed(Unconsumed<I>),
}

/// Event type of text-to-speech adapters
pub type TtsEvent = AdapterEvent<String, Vec<u8>>;

/// Event type of speech-to-text adapters
pub type SttEvent = AdapterEvent<Vec<u8>, String>;

struct Envelope<I, O> {
    source: u64,
    event: AdapterEvent<I, O>,
}

/// Sending half of an event channel, stamped with the id of its producer
pub struct EventSink<I, O> {
    source: u64,
    tx: mpsc::UnboundedSender<Envelope<I, O>>,
}

impl<I, O> Clone for EventSink<I, O> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            tx: self.tx.clone(),
        }
    }
}

impl<I, O> EventSink<I, O> {
    /// Deliver an event. Returns false once the receiver has been dropped.
    pub fn emit(&self, event: AdapterEvent<I, O>) -> bool {
        self.tx
            .send(Envelope {
                source: self.source,
                event,
            })
            .is_ok()
    }

    /// A sink on the same channel that stamps events with another source id
    pub fn with_source(&self, source: u64) -> Self {
        Self {
            source,
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of an event channel
pub struct Events<I, O> {
    rx: mpsc::UnboundedReceiver<Envelope<I, O>>,
}

impl<I, O> Events<I, O> {
    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<AdapterEvent<I, O>> {
        self.rx.recv().await.map(|envelope| envelope.event)
    }

    /// Next event without waiting
    pub fn try_recv(&mut self) -> Option<AdapterEvent<I, O>> {
        self.rx.try_recv().ok().map(|envelope| envelope.event)
    }

    /// Wait for the next event together with the id of the sink that sent it
    pub async fn recv_tagged(&mut self) -> Option<(u64, AdapterEvent<I, O>)> {
        self.rx
            .recv()
            .await
            .map(|envelope| (envelope.source, envelope.event))
    }
}

/// Create an event channel whose sink is stamped with source id 0
pub fn event_channel<I, O>() -> (EventSink<I, O>, Events<I, O>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { source: 0, tx }, Events { rx })
}

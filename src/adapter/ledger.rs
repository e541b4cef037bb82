//! Sent ledger
//!
//! Everything released to the provider for the open utterance, kept until the
//! utterance closes so it can be replayed after a reconnect or handed to the
//! next provider when this one gives up.

use std::fmt;

use super::confirmation::strip_confirmed;

/// Input element carried through an adapter (text for TTS, audio for STT)
pub trait Payload: Clone + fmt::Debug + Send + Sync + 'static {
    fn is_empty(&self) -> bool;

    /// Text view used for echo confirmation; audio has none
    fn as_text(&self) -> Option<&str> {
        None
    }

    /// Merge chunks for a failure hand-off, dropping empty ones
    fn coalesce(chunks: Vec<Self>) -> Vec<Self>;

    /// The part of `chunks` the provider has not confirmed yet
    fn unconfirmed(chunks: &[Self], confirmed: &str) -> Vec<Self>;
}

impl Payload for String {
    fn is_empty(&self) -> bool {
        String::is_empty(self)
    }

    fn as_text(&self) -> Option<&str> {
        Some(self)
    }

    fn coalesce(chunks: Vec<Self>) -> Vec<Self> {
        let joined = chunks.concat();
        if joined.is_empty() {
            Vec::new()
        } else {
            vec![joined]
        }
    }

    fn unconfirmed(chunks: &[Self], confirmed: &str) -> Vec<Self> {
        if confirmed.trim().is_empty() {
            return chunks.iter().filter(|c| !c.is_empty()).cloned().collect();
        }
        let sent = chunks.concat();
        match strip_confirmed(&sent, confirmed) {
            Some("") => Vec::new(),
            Some(rest) => vec![rest.to_string()],
            // The echo does not line up with what was sent; trust nothing
            None => vec![sent],
        }
    }
}

impl Payload for Vec<u8> {
    fn is_empty(&self) -> bool {
        <[u8]>::is_empty(self)
    }

    fn coalesce(chunks: Vec<Self>) -> Vec<Self> {
        chunks.into_iter().filter(|c| !c.is_empty()).collect()
    }

    fn unconfirmed(chunks: &[Self], _confirmed: &str) -> Vec<Self> {
        chunks.iter().filter(|c| !c.is_empty()).cloned().collect()
    }
}

/// Input transmitted (or queued for transmission) in the open utterance
#[derive(Debug, Clone)]
pub struct SentLedger<T> {
    chunks: Vec<T>,
}

impl<T> Default for SentLedger<T> {
    fn default() -> Self {
        Self { chunks: Vec::new() }
    }
}

impl<T: Payload> SentLedger<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: T) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn chunks(&self) -> &[T] {
        &self.chunks
    }

    /// Concatenated text of the ledger; empty for audio
    pub fn text(&self) -> String {
        self.chunks.iter().filter_map(Payload::as_text).collect()
    }

    /// Chunks still to be confirmed, in send order
    pub fn unconfirmed(&self, confirmed: &str) -> Vec<T> {
        T::unconfirmed(&self.chunks, confirmed)
    }
}

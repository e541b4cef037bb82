//! Chunking policies
//!
//! A policy sits between the caller's input stream and the wire. It decides
//! which part of the input may be transmitted now and which part must wait.
//! Whatever a policy withholds is released by `flush` when input ends, so
//! every chunk reaches the provider exactly once and in order.

use std::mem;

use super::ledger::Payload;

pub trait ChunkingPolicy<T>: Send {
    fn name(&self) -> &'static str;

    /// Accept a chunk of input; returns what may be transmitted now
    fn push(&mut self, chunk: T) -> Option<T>;

    /// Release everything withheld (end of input or hand-off)
    fn flush(&mut self) -> Option<T>;

    /// Forget withheld input (new utterance or cancel)
    fn reset(&mut self);
}

/// Transmit every chunk as soon as it arrives
#[derive(Debug, Clone, Copy, Default)]
pub struct Eager;

impl<T: Payload> ChunkingPolicy<T> for Eager {
    fn name(&self) -> &'static str {
        "eager"
    }

    fn push(&mut self, chunk: T) -> Option<T> {
        (!chunk.is_empty()).then_some(chunk)
    }

    fn flush(&mut self) -> Option<T> {
        None
    }

    fn reset(&mut self) {}
}

/// Withhold a trailing partial word until whitespace completes it
#[derive(Debug, Clone, Default)]
pub struct WordBoundary {
    pending: String,
}

impl WordBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text currently withheld
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

impl ChunkingPolicy<String> for WordBoundary {
    fn name(&self) -> &'static str {
        "word-boundary"
    }

    fn push(&mut self, chunk: String) -> Option<String> {
        self.pending.push_str(&chunk);
        let (index, space) = self
            .pending
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())?;
        let rest = self.pending.split_off(index + space.len_utf8());
        Some(mem::replace(&mut self.pending, rest))
    }

    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.pending))
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(policy: &mut dyn ChunkingPolicy<String>, input: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = input
            .iter()
            .filter_map(|chunk| policy.push(chunk.to_string()))
            .collect();
        out.extend(policy.flush());
        out
    }

    #[test]
    fn test_word_boundary_withholds_partial_word() {
        let mut policy = WordBoundary::new();
        assert_eq!(frames(&mut policy, &["Hello ", "wor", "ld."]), vec!["Hello ", "world."]);
    }

    #[test]
    fn test_word_boundary_splits_after_last_space() {
        let mut policy = WordBoundary::new();
        assert_eq!(policy.push("Hello wo".to_string()), Some("Hello ".to_string()));
        assert_eq!(policy.pending(), "wo");
        assert_eq!(policy.push("rld how".to_string()), Some("world ".to_string()));
        assert_eq!(policy.flush(), Some("how".to_string()));
        assert_eq!(policy.flush(), None);
    }

    #[test]
    fn test_word_boundary_never_splits_words_for_any_chunking() {
        let text = "The quick brown fox jumps over the lazy dog.";
        for size in 1..text.len() {
            let chunks: Vec<&str> = text
                .as_bytes()
                .chunks(size)
                .map(|c| std::str::from_utf8(c).unwrap())
                .collect();
            let mut policy = WordBoundary::new();
            let out = frames(&mut policy, &chunks);
            assert_eq!(out.concat(), text);
            for frame in &out[..out.len() - 1] {
                assert!(frame.ends_with(' '), "frame {:?} splits a word", frame);
            }
        }
    }

    #[test]
    fn test_word_boundary_multibyte_whitespace() {
        let mut policy = WordBoundary::new();
        assert_eq!(policy.push("un\u{3000}deux".to_string()), Some("un\u{3000}".to_string()));
        assert_eq!(policy.flush(), Some("deux".to_string()));
    }

    #[test]
    fn test_reset_drops_pending() {
        let mut policy = WordBoundary::new();
        policy.push("partial".to_string());
        policy.reset();
        assert_eq!(policy.flush(), None);
    }

    #[test]
    fn test_eager_passes_through() {
        let mut policy = Eager;
        assert_eq!(ChunkingPolicy::<Vec<u8>>::push(&mut policy, vec![1, 2]), Some(vec![1, 2]));
        assert_eq!(ChunkingPolicy::<Vec<u8>>::push(&mut policy, vec![]), None);
        assert_eq!(ChunkingPolicy::<String>::flush(&mut policy), None);
    }
}

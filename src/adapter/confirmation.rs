//! Completion correction
//!
//! Some providers do not flag the last chunk of an utterance reliably. A
//! [`CompletionCorrection`] policy decides, from what the provider echoes
//! back, whether output belongs to the open utterance and whether that
//! utterance is actually complete.
//!
//! - [`ProviderSignal`]: no correction, the provider's done signal is trusted
//! - [`EchoCorrection`]: tracks echoed text in a [`ConfirmationCursor`] and
//!   declares completion once the cursor covers everything sent

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to one space and trim both ends
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Remove `confirmed` from the front of `sent`, ignoring whitespace.
///
/// Returns the unconfirmed rest (starting at its first non-whitespace
/// character), or `None` when `confirmed` is not a prefix of `sent`.
pub fn strip_confirmed<'a>(sent: &'a str, confirmed: &str) -> Option<&'a str> {
    let mut remaining = sent.char_indices().filter(|(_, c)| !c.is_whitespace());
    for expected in confirmed.chars().filter(|c| !c.is_whitespace()) {
        match remaining.next() {
            Some((_, c)) if c == expected => {}
            _ => return None,
        }
    }
    Some(match remaining.next() {
        Some((index, _)) => &sent[index..],
        None => "",
    })
}

/// Cumulative text the provider has acknowledged for the open utterance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationCursor {
    text: String,
}

impl ConfirmationCursor {
    pub fn advance(&mut self, echo: &str) {
        self.text.push_str(echo);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

/// Named policy correcting unreliable completion signals
pub trait CompletionCorrection: Send {
    fn name(&self) -> &'static str;

    /// Judge an output chunk carrying echoed text. `false` means the chunk
    /// belongs to text that was never sent in this utterance.
    fn accept_echo(&mut self, sent: &str, echo: &str) -> bool;

    /// Whether the utterance is complete even without a provider done signal
    fn is_complete(&self, sent: &str, input_ended: bool) -> bool;

    /// Text confirmed so far; replay skips it
    fn confirmed(&self) -> &str;

    fn reset(&mut self);
}

/// Trust the provider's completion signal
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderSignal;

impl CompletionCorrection for ProviderSignal {
    fn name(&self) -> &'static str {
        "provider-signal"
    }

    fn accept_echo(&mut self, _sent: &str, _echo: &str) -> bool {
        true
    }

    fn is_complete(&self, _sent: &str, _input_ended: bool) -> bool {
        false
    }

    fn confirmed(&self) -> &str {
        ""
    }

    fn reset(&mut self) {}
}

/// Complete the utterance once the echoed text matches everything sent
#[derive(Debug, Clone, Default)]
pub struct EchoCorrection {
    cursor: ConfirmationCursor,
}

impl EchoCorrection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> &ConfirmationCursor {
        &self.cursor
    }
}

impl CompletionCorrection for EchoCorrection {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn accept_echo(&mut self, sent: &str, echo: &str) -> bool {
        let candidate = format!("{}{}", self.cursor.as_str(), echo);
        if !normalize(sent).starts_with(&normalize(&candidate)) {
            return false;
        }
        self.cursor.advance(echo);
        true
    }

    fn is_complete(&self, sent: &str, input_ended: bool) -> bool {
        input_ended && normalize(self.cursor.as_str()) == normalize(sent)
    }

    fn confirmed(&self) -> &str {
        self.cursor.as_str()
    }

    fn reset(&mut self) {
        self.cursor.clear();
    }
}

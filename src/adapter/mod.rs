//! Provider adapters
//!
//! An adapter turns an input stream into output events through one provider.
//! It owns its transport session and survives disconnects by reconnecting and
//! replaying whatever the provider has not confirmed. When its retry budget is
//! spent it emits `Failed` with the unconsumed input and stays idle.
//!
//! - [`chunking`]: when input may be transmitted
//! - [`confirmation`]: completion correction for unreliable done signals
//! - [`ledger`]: input sent in the open utterance
//! - [`protocol`]: provider framing
//! - [`retry`]: reconnect budget
//! - [`session`]: the shared reconnect/backoff/replay state machine

pub mod chunking;
pub mod confirmation;
pub mod ledger;
pub mod protocol;
pub mod retry;
pub mod session;

use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::Span;

use crate::error::ProtocolError;
use crate::stream::{EventSink, InputStream};

pub use chunking::{ChunkingPolicy, Eager, WordBoundary};
pub use confirmation::{CompletionCorrection, ConfirmationCursor, EchoCorrection, ProviderSignal};
pub use ledger::{Payload, SentLedger};
pub use protocol::{Inbound, Protocol};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use session::ProviderAdapter;

/// Identifies an utterance within one adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Epoch {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(Epoch)
            .map_err(|_| ProtocolError::InvalidContext(s.to_string()))
    }
}

/// Lifecycle contract shared by provider adapters and the fallback orchestrator
#[cfg_attr(test, mockall::automock)]
pub trait Adapter<I: Send + 'static>: Send {
    /// Begin a new utterance, superseding the one in flight
    fn start(&mut self, input: InputStream<I>);

    /// Abort the open utterance; nothing happens when idle
    fn cancel(&mut self);

    /// Tear down the adapter; later calls do nothing
    fn destroy(&mut self);
}

/// What an adapter receives at construction
pub struct AdapterContext<I, O> {
    /// Where output and failure events go
    pub events: EventSink<I, O>,
    /// Span the adapter logs under
    pub span: Span,
}

impl<I, O> AdapterContext<I, O> {
    pub fn new(events: EventSink<I, O>, span: Span) -> Self {
        Self { events, span }
    }
}

/// Builds an adapter emitting into the given context
pub type AdapterFactory<I, O> =
    Box<dyn Fn(AdapterContext<I, O>) -> Box<dyn Adapter<I>> + Send + Sync>;

pub(crate) enum Command<I> {
    Start(InputStream<I>),
    Cancel,
    Destroy,
}

/// Handle side of an adapter actor
pub(crate) struct Mailbox<I> {
    tx: mpsc::UnboundedSender<Command<I>>,
    destroyed: bool,
}

impl<I> Mailbox<I> {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Command<I>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                destroyed: false,
            },
            rx,
        )
    }

    pub(crate) fn start(&self, input: InputStream<I>) {
        if !self.destroyed {
            let _ = self.tx.send(Command::Start(input));
        }
    }

    pub(crate) fn cancel(&self) {
        if !self.destroyed {
            let _ = self.tx.send(Command::Cancel);
        }
    }

    pub(crate) fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            let _ = self.tx.send(Command::Destroy);
        }
    }
}

impl<I> Drop for Mailbox<I> {
    fn drop(&mut self) {
        self.destroy();
    }
}

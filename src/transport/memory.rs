//! In-process transport
//!
//! Connects sessions to a [`RemotePeer`] living in the same process. Used for
//! loopback wiring and to script provider behaviour in tests: refuse
//! connections, reply with arbitrary frames, close with arbitrary codes.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{Connector, Frame, Outbound, Session, TransportEvent};
use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    None,
    Next(usize),
    Always,
}

#[derive(Debug)]
struct Inner {
    refusal: Mutex<Refusal>,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<RemotePeer>,
}

/// Connector whose far end is handed out through a channel
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl MemoryConnector {
    /// Create a connector and the receiver of the peers it accepts
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemotePeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                refusal: Mutex::new(Refusal::None),
                attempts: AtomicUsize::new(0),
                peers,
            }),
        };
        (connector, accepted)
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.set_refusal(if count == 0 { Refusal::None } else { Refusal::Next(count) });
    }

    /// Refuse every connection attempt from now on
    pub fn refuse_all(&self) {
        self.set_refusal(Refusal::Always);
    }

    /// Accept every connection attempt from now on
    pub fn accept_all(&self) {
        self.set_refusal(Refusal::None);
    }

    /// Number of connection attempts made so far
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    fn set_refusal(&self, refusal: Refusal) {
        *self.inner.refusal.lock().unwrap_or_else(|e| e.into_inner()) = refusal;
    }

    fn should_refuse(&self) -> bool {
        let mut refusal = self.inner.refusal.lock().unwrap_or_else(|e| e.into_inner());
        match *refusal {
            Refusal::None => false,
            Refusal::Always => true,
            Refusal::Next(left) => {
                *refusal = if left > 1 { Refusal::Next(left - 1) } else { Refusal::None };
                true
            }
        }
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Session, RelayError> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_refuse() {
            return Err(RelayError::Connect(format!(
                "memory peer refused attempt {}",
                attempt
            )));
        }

        let (outbound, frames) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        let peer = RemotePeer { frames, events };
        if self.inner.peers.send(peer).is_err() {
            return Err(RelayError::Connect("no memory peer is listening".to_string()));
        }
        Ok(Session::new(outbound, inbound))
    }
}

/// The provider side of an in-process session
#[derive(Debug)]
pub struct RemotePeer {
    frames: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl RemotePeer {
    /// Next frame sent by the client; `None` once the client closed the session
    pub async fn next_frame(&mut self) -> Option<Frame> {
        match self.frames.recv().await {
            Some(Outbound::Frame(frame)) => Some(frame),
            Some(Outbound::Close) | None => None,
        }
    }

    /// Next text frame, parsed as JSON
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let frame = self.next_frame().await?;
        serde_json::from_str(frame.as_text()?).ok()
    }

    /// A frame the client already sent, without waiting
    pub fn try_frame(&mut self) -> Option<Frame> {
        match self.frames.try_recv() {
            Ok(Outbound::Frame(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Deliver a frame to the client
    pub fn reply(&self, frame: Frame) -> bool {
        self.events.send(TransportEvent::Message(frame)).is_ok()
    }

    /// Deliver a JSON text frame to the client
    pub fn reply_json<T: Serialize>(&self, value: &T) -> bool {
        match Frame::json(value) {
            Ok(frame) => self.reply(frame),
            Err(_) => false,
        }
    }

    /// Report a transport error to the client
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Error(message.into())).is_ok()
    }

    /// Close the connection from the provider side
    pub fn close(self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: reason.into(),
        });
    }
}

//! Transport sessions
//!
//! A [`Session`] owns one physical connection to one provider. It is a plain
//! connect/send/receive/close primitive: it neither queues frames for a
//! connection that is not open yet nor retries. Reconnect policy lives in the
//! adapter that owns the session.
//!
//! Connections are opened through a [`Connector`]. The WebSocket connector
//! talks to real providers; the memory connector wires a session to an
//! in-process peer.

pub mod memory;
pub mod websocket;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::RelayError;

pub use memory::{MemoryConnector, RemotePeer};
pub use websocket::WsConnector;

/// Close code signalling an intentional shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// A provider message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Serialize a value into a text frame
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Frame::Text)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

/// Something observed on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Frame),
    Error(String),
    /// The connection is gone. `code` is `None` when it vanished without a close frame.
    Closed { code: Option<u16>, reason: String },
}

impl TransportEvent {
    /// Whether this is an intentional close rather than a transport failure
    pub fn is_clean_close(&self) -> bool {
        matches!(self, TransportEvent::Closed { code: Some(NORMAL_CLOSURE), .. })
    }
}

/// Requests from a session to whatever drives the physical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close,
}

/// One open connection to a provider
#[derive(Debug)]
pub struct Session {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    closed: bool,
}

impl Session {
    /// Build a session over the channels of a connection driver
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            closed: false,
        }
    }

    /// Transmit a frame. Fails once the session is closed or its driver is gone.
    pub fn send(&self, frame: Frame) -> Result<(), RelayError> {
        if self.closed {
            return Err(RelayError::SessionClosed);
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| RelayError::SessionClosed)
    }

    /// Next event from the connection; `None` once the driver has stopped
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Request a clean close. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens sessions to one provider endpoint
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Session, RelayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close_detection() {
        let clean = TransportEvent::Closed {
            code: Some(NORMAL_CLOSURE),
            reason: String::new(),
        };
        let abnormal = TransportEvent::Closed {
            code: Some(1006),
            reason: "abnormal".into(),
        };
        let vanished = TransportEvent::Closed {
            code: None,
            reason: String::new(),
        };
        assert!(clean.is_clean_close());
        assert!(!abnormal.is_clean_close());
        assert!(!vanished.is_clean_close());
        assert!(!TransportEvent::Error("boom".into()).is_clean_close());
    }

    #[test]
    fn test_json_frame() {
        let frame = Frame::json(&serde_json::json!({"text": " "})).unwrap();
        assert_eq!(frame.as_text(), Some(r#"{"text":" "}"#));
        assert_eq!(Frame::Binary(vec![1]).as_text(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let mut session = Session::new(out_tx, in_rx);

        session.send(Frame::Text("hi".into())).unwrap();
        session.close();
        session.close();
        assert!(matches!(session.send(Frame::Text("late".into())), Err(RelayError::SessionClosed)));
        drop(session);

        assert_eq!(out_rx.recv().await, Some(Outbound::Frame(Frame::Text("hi".into()))));
        assert_eq!(out_rx.recv().await, Some(Outbound::Close));
        assert_eq!(out_rx.recv().await, None);
    }
}

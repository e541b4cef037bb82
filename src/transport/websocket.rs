//! WebSocket transport
//!
//! Opens provider connections with tokio-tungstenite and runs one pump task
//! per connection that moves frames between the socket and the [`Session`]
//! channels.

use futures::{SinkExt, StreamExt};
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, Instrument};
use url::Url;

use super::{Connector, Frame, Outbound, Session, TransportEvent, NORMAL_CLOSURE};
use crate::error::RelayError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for a provider WebSocket endpoint
#[derive(Clone)]
pub struct WsConnector {
    url: Url,
    headers: Vec<(String, String)>,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    /// Add a header to the handshake request (e.g. an API key)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request(&self) -> Result<Request, RelayError> {
        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in &self.headers {
            let invalid = |reason: String| RelayError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            request.headers_mut().insert(header_name, header_value);
        }
        Ok(request)
    }
}

impl fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Query strings and header values may carry credentials
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("WsConnector")
            .field("endpoint", &&self.url[..url::Position::AfterPath])
            .field("headers", &names)
            .finish()
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Session, RelayError> {
        let request = self.request()?;
        let (socket, response) = connect_async(request).await?;
        debug!(
            endpoint = &self.url[..url::Position::AfterPath],
            status = %response.status(),
            "websocket handshake complete"
        );

        let (outbound, requests) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, requests, events).in_current_span());
        Ok(Session::new(outbound, inbound))
    }
}

fn into_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::text(text),
        Frame::Binary(data) => WsMessage::binary(data),
    }
}

async fn pump(
    socket: Socket,
    mut requests: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = sink.send(into_message(frame)).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(close))).await;
                    let _ = sink.close().await;
                    let _ = events.send(TransportEvent::Closed {
                        code: Some(NORMAL_CLOSURE),
                        reason: "closed by client".to_string(),
                    });
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    let _ = events.send(TransportEvent::Message(Frame::Binary(data.to_vec())));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    break;
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let _ = events.send(TransportEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            }
        }
    }
}

//! Framed bidirectional connection shared by the relay and the sidecar.
//!
//! A [`Connection`] is a pair of boxed frame sink/stream halves, so the same
//! type wraps a tokio-tungstenite client, an axum server socket (adapted in
//! the relay) or an in-memory channel pair. Every binary frame carries one
//! [`Envelope`].

use crate::API_KEY_HEADER;
use crate::codec::{CodecError, Envelope};
use crate::errors::{Categorized, ErrorCategory};
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{WebSocketStream, connect_async};
use url::Url;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (server shutdown, superseded connection).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Policy violation, used for failed authentication.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("relay rejected connection with HTTP {status}")]
    Rejected { status: u16 },

    #[error("connection error: {0}")]
    Io(String),

    #[error("no frame received for {0:?}")]
    IdleTimeout(Duration),

    #[error("connection closed")]
    Closed,
}

impl Categorized for TransportError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Transport
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "")
    }
}

/// Transport-level unit, independent of the underlying socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseReason>),
}

/// What a read produced.
#[derive(Debug)]
pub enum Inbound {
    Envelope(Envelope),
    /// A binary frame that did not decode; the connection stays usable.
    Invalid(CodecError),
    /// Keep-alive probe. [`Connection::recv`] answers these itself.
    Ping(Vec<u8>),
    Closed(Option<CloseReason>),
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// Write half.
pub struct ConnectionWriter {
    sink: FrameSink,
    closed: bool,
}

impl ConnectionWriter {
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send_frame(Frame::Binary(envelope.encode_frame())).await
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink.send(frame).await
    }

    pub async fn ping(&mut self) -> Result<(), TransportError> {
        self.send_frame(Frame::Ping(Vec::new())).await
    }

    /// Send a close frame and shut the sink. Idempotent.
    pub async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let sent = self.sink.send(Frame::Close(Some(reason))).await;
        let closed = self.sink.close().await;
        sent.and(closed)
    }
}

/// Read half.
pub struct ConnectionReader {
    stream: FrameStream,
}

impl ConnectionReader {
    /// Wait for the next meaningful frame. Pongs are swallowed.
    ///
    /// With `idle` set, a silent peer yields [`TransportError::IdleTimeout`].
    pub async fn recv(&mut self, idle: Option<Duration>) -> Result<Inbound, TransportError> {
        loop {
            let next = match idle {
                Some(limit) => tokio::time::timeout(limit, self.stream.next())
                    .await
                    .map_err(|_| TransportError::IdleTimeout(limit))?,
                None => self.stream.next().await,
            };

            match next {
                None => return Ok(Inbound::Closed(None)),
                Some(Err(e)) => return Err(e),
                Some(Ok(Frame::Pong(_))) => continue,
                Some(Ok(Frame::Ping(payload))) => return Ok(Inbound::Ping(payload)),
                Some(Ok(Frame::Close(reason))) => return Ok(Inbound::Closed(reason)),
                Some(Ok(Frame::Binary(bytes))) => {
                    return Ok(match Envelope::decode_frame(&bytes) {
                        Ok(envelope) => Inbound::Envelope(envelope),
                        Err(e) => Inbound::Invalid(e),
                    });
                }
            }
        }
    }
}

/// One persistent, message-framed, bidirectional connection.
pub struct Connection {
    writer: ConnectionWriter,
    reader: ConnectionReader,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self {
            writer: ConnectionWriter {
                sink,
                closed: false,
            },
            reader: ConnectionReader { stream },
        }
    }

    /// Wrap an established WebSocket.
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => message_to_frame(message).map(Ok),
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    Some(Err(TransportError::Closed))
                }
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            })
        });
        Self::new(Box::pin(sink), Box::pin(stream))
    }

    /// Two connected in-process endpoints.
    pub fn in_memory_pair() -> (Self, Self) {
        fn half(
            tx: mpsc::UnboundedSender<Frame>,
            rx: mpsc::UnboundedReceiver<Frame>,
        ) -> Connection {
            let sink = tx.sink_map_err(|_| TransportError::Closed);
            Connection::new(Box::pin(sink), Box::pin(rx.map(Ok::<Frame, TransportError>)))
        }
        let (a_tx, b_rx) = mpsc::unbounded();
        let (b_tx, a_rx) = mpsc::unbounded();
        (half(a_tx, a_rx), half(b_tx, b_rx))
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.writer.send(envelope).await
    }

    /// Read the next envelope, answering keep-alive pings inline.
    pub async fn recv(&mut self, idle: Option<Duration>) -> Result<Inbound, TransportError> {
        loop {
            match self.reader.recv(idle).await? {
                Inbound::Ping(payload) => {
                    self.writer.send_frame(Frame::Pong(payload)).await?;
                }
                other => return Ok(other),
            }
        }
    }

    pub async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        self.writer.close(reason).await
    }

    pub fn split(self) -> (ConnectionWriter, ConnectionReader) {
        (self.writer, self.reader)
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        // Text is not part of the protocol; surface it so it fails decoding
        // instead of silently vanishing.
        Message::Text(text) => Some(Frame::Binary(text.as_str().as_bytes().to_vec())),
        Message::Ping(bytes) => Some(Frame::Ping(bytes.to_vec())),
        Message::Pong(bytes) => Some(Frame::Pong(bytes.to_vec())),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_string(),
        }))),
        Message::Frame(_) => None,
    }
}

/// Dial `url`, presenting `api_key` in the upgrade request.
pub async fn connect(
    url: &Url,
    api_key: &str,
    dial_timeout: Duration,
) -> Result<Connection, TransportError> {
    let connect_err = |message: String| TransportError::Connect {
        url: url.to_string(),
        message,
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| connect_err(e.to_string()))?;
    let key = HeaderValue::from_str(api_key)
        .map_err(|_| connect_err("API key is not a valid header value".to_string()))?;
    request.headers_mut().insert(API_KEY_HEADER, key);

    let (ws, _response) = tokio::time::timeout(dial_timeout, connect_async(request))
        .await
        .map_err(|_| connect_err(format!("timed out after {dial_timeout:?}")))?
        .map_err(|e| match e {
            tungstenite::Error::Http(response) => TransportError::Rejected {
                status: response.status().as_u16(),
            },
            other => connect_err(other.to_string()),
        })?;

    Ok(Connection::from_websocket(ws))
}

//! Adapts an upgraded axum WebSocket into a [`Connection`].

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use csync_common::transport::{CloseReason, Connection, Frame, TransportError};
use futures::{SinkExt, StreamExt, future};

pub fn into_connection(socket: WebSocket) -> Connection {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| TransportError::Io(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));
    let stream = stream.map(|item| match item {
        Ok(message) => Ok(message_to_frame(message)),
        Err(e) => Err(TransportError::Io(e.to_string())),
    });
    Connection::new(Box::pin(sink), Box::pin(stream))
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        Message::Text(text) => Frame::Binary(text.as_str().as_bytes().to_vec()),
        Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
        Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
        Message::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
            code: f.code,
            reason: f.reason.as_str().to_string(),
        })),
    }
}

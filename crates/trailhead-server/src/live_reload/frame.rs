//! Transport-neutral frames.

use axum::extract::ws::{CloseFrame, Message, close_code};

/// Unit exchanged with a connected client.
///
/// Pings, pongs and binary frames are transport concerns and never reach the
/// broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text message.
    Text(String),
    /// Cooperative close.
    Close,
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Close => Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            })),
        }
    }
}

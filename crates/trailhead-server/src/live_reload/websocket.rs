//! WebSocket handler for live reload.
//!
//! Adapts an axum WebSocket into the frame sink and stream the manager
//! expects, then hands the connection over.

use std::future;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};

use super::frame::Frame;
use crate::state::AppState;

/// Handle WebSocket upgrade for live reload.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(manager) = state.live_reload.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = split_socket(socket);
        if let Err(e) = manager.accept(sink, stream) {
            tracing::debug!(error = %e, "Rejected live reload connection");
        }
    })
}

/// Split a socket into a `Frame` sink and a `Frame` stream.
///
/// Pings, pongs and binary messages are dropped from the stream; axum answers
/// pings itself.
fn split_socket(
    socket: WebSocket,
) -> (
    impl futures_util::Sink<Frame, Error = axum::Error> + Send + 'static,
    impl futures_util::Stream<Item = Result<Frame, axum::Error>> + Send + 'static,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));
    let stream = stream.filter_map(|message| future::ready(frame_from_message(message)));
    (sink, stream)
}

fn frame_from_message(
    message: Result<Message, axum::Error>,
) -> Option<Result<Frame, axum::Error>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_)) => None,
        Err(e) => Some(Err(e)),
    }
}

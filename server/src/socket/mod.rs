// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

mod bot_socket;
mod eval_socket;
mod feed_socket;
mod game_socket;

pub use self::bot_socket::serve_bot_socket;
pub use self::eval_socket::serve_eval_socket;
pub use self::feed_socket::{serve_live_socket, serve_lobby_socket};
pub use self::game_socket::serve_game_socket;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use serde::Serialize;
use wallgame_common::protocol::MAX_MESSAGE_BYTES;

/// One UTF-8 JSON message per text frame.
pub(crate) fn text_frame<T: Serialize>(message: &T) -> Message {
    Message::Text(serde_json::to_string(message).unwrap().into())
}

/// Whether an inbound text frame of `len` bytes is small enough to
/// process. The advertised limit is the first rejected size.
pub(crate) fn frame_size_ok(len: usize) -> bool {
    len < MAX_MESSAGE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_boundary() {
        assert!(frame_size_ok(0));
        assert!(frame_size_ok(MAX_MESSAGE_BYTES - 1));
        assert!(!frame_size_ok(MAX_MESSAGE_BYTES));
        assert!(!frame_size_ok(MAX_MESSAGE_BYTES + 1));
    }
}

/// Sends a close frame; failures mean the peer beat us to it.
pub(crate) async fn send_close(socket: &mut WebSocket, code: u16) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        })))
        .await;
}

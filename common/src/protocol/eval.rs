// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use crate::game::Variant;
use crate::GameId;
use serde::{Deserialize, Serialize};

/// One scored position in a bot game session's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalEntry {
    pub ply: u32,
    /// In [-1, +1], positive favoring player one.
    pub evaluation: f32,
    pub best_move: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalRejectCode {
    NoBot,
    RatedPlayer,
    GameNotFound,
    InternalError,
}

/// Frames an eval-bar subscriber sends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EvalClientMessage {
    #[serde(rename = "eval-handshake", rename_all = "camelCase")]
    Handshake {
        game_id: GameId,
        variant: Variant,
        board_width: u8,
        board_height: u8,
    },
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the server sends to an eval-bar subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EvalServerMessage {
    #[serde(rename = "eval-handshake-accepted")]
    HandshakeAccepted,
    #[serde(rename = "eval-handshake-rejected")]
    HandshakeRejected {
        code: EvalRejectCode,
        message: String,
    },
    #[serde(rename = "eval-pending", rename_all = "camelCase")]
    Pending { total_moves: u32 },
    #[serde(rename = "eval-history")]
    History { entries: Vec<EvalEntry> },
    #[serde(rename = "eval-update", rename_all = "camelCase")]
    Update {
        ply: u32,
        evaluation: f32,
        best_move: String,
    },
    #[serde(rename = "eval-error")]
    Error {
        code: EvalRejectCode,
        message: String,
    },
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_wire_format() {
        let json = r#"{"type":"eval-handshake","gameId":"g42","variant":"standard","boardWidth":5,"boardHeight":5}"#;
        let msg: EvalClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            EvalClientMessage::Handshake {
                game_id: GameId::new("g42"),
                variant: Variant::Standard,
                board_width: 5,
                board_height: 5,
            }
        );
    }

    #[test]
    fn history_round_trips() {
        let msg = EvalServerMessage::History {
            entries: vec![EvalEntry {
                ply: 0,
                evaluation: 0.25,
                best_move: "c3".to_owned(),
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"eval-history\""));
        assert!(json.contains("\"bestMove\":\"c3\""));
        assert_eq!(serde_json::from_str::<EvalServerMessage>(&json).unwrap(), msg);
    }
}

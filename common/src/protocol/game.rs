// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use crate::dto::{MatchStatusDto, SessionView};
use crate::{AccessToken, GameId};
use serde::{Deserialize, Serialize};

/// Frames a player or spectator sends on the game socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameClientMessage {
    #[serde(rename = "move")]
    Move { notation: String },
    #[serde(rename = "resign")]
    Resign,
    #[serde(rename = "draw-offer")]
    DrawOffer,
    #[serde(rename = "draw-accept")]
    DrawAccept,
    #[serde(rename = "draw-reject")]
    DrawReject,
    #[serde(rename = "takeback-offer")]
    TakebackOffer,
    #[serde(rename = "takeback-accept")]
    TakebackAccept,
    #[serde(rename = "takeback-reject")]
    TakebackReject,
    #[serde(rename = "rematch-offer")]
    RematchOffer,
    #[serde(rename = "rematch-accept")]
    RematchAccept,
    #[serde(rename = "rematch-reject")]
    RematchReject,
    #[serde(rename = "give-time")]
    GiveTime,
    #[serde(rename = "chat")]
    Chat { message: String },
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the server sends on the game socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameServerMessage {
    /// Full authoritative view; sent on connect and after every change.
    #[serde(rename = "state")]
    State { game: SessionView },
    #[serde(rename = "match-status")]
    MatchStatus(MatchStatusDto),
    #[serde(rename = "draw-offer")]
    DrawOffer,
    #[serde(rename = "draw-rejected")]
    DrawRejected,
    #[serde(rename = "takeback-offer")]
    TakebackOffer,
    #[serde(rename = "takeback-rejected")]
    TakebackRejected,
    #[serde(rename = "rematch-offer")]
    RematchOffer,
    #[serde(rename = "rematch-rejected")]
    RematchRejected,
    /// Both seats agreed; the next game of the series is ready to join.
    /// Players receive their fresh seat credentials, spectators only
    /// the id.
    #[serde(rename = "rematch-started", rename_all = "camelCase")]
    RematchStarted {
        game_id: GameId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<AccessToken>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        socket_token: Option<AccessToken>,
    },
    #[serde(rename = "chat")]
    Chat { from: String, message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_tags() {
        let mv: GameClientMessage =
            serde_json::from_str(r#"{"type":"move","notation":"---"}"#).unwrap();
        assert_eq!(
            mv,
            GameClientMessage::Move {
                notation: "---".to_owned()
            }
        );
        let offer: GameClientMessage = serde_json::from_str(r#"{"type":"draw-offer"}"#).unwrap();
        assert_eq!(offer, GameClientMessage::DrawOffer);
    }
}

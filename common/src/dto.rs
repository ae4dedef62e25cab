// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use crate::game::{GameResult, GameState, MatchType, TimeControl, Variant};
use crate::{Appearance, CompositeId, GameId, PlayerNumber, SeriesId};
use serde::{Deserialize, Serialize};

/// Lifecycle of a session record (distinct from the in-game
/// [`crate::game::GameStatus`], which only knows playing/finished).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Waiting,
    Ready,
    InProgress,
    Completed,
}

/// What everyone may know about a seat. Tokens never appear here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub player_id: PlayerNumber,
    pub display_name: String,
    pub connected: bool,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
    /// Present iff this seat is played by a bot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<CompositeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

/// Cumulative score of a rematch series, by role. Wins count 1, draws
/// count 0.5 for each side, so the total equals the number of scored
/// games.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchScoreDto {
    pub host: f64,
    pub joiner: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatusDto {
    pub score: MatchScoreDto,
    pub game_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<GameResult>,
    /// Updated Elo per seat, host first, for rated games.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratings: Option<[f64; 2]>,
}

/// The full view broadcast to players and spectators of one game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub game_id: GameId,
    pub series_id: SeriesId,
    pub rematch_number: u32,
    pub variant: Variant,
    pub board_width: u8,
    pub board_height: u8,
    pub time_control: TimeControl,
    pub rated: bool,
    pub match_type: MatchType,
    pub status: SessionStatus,
    pub cancelled: bool,
    pub host: SeatView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joiner: Option<SeatView>,
    pub game: GameState,
    pub match_score: MatchScoreDto,
    pub spectators: u32,
}

/// Compact listing for the lobby and live-games feeds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummaryDto {
    pub game_id: GameId,
    pub variant: Variant,
    pub board_width: u8,
    pub board_height: u8,
    pub time_control: TimeControl,
    pub rated: bool,
    pub match_type: MatchType,
    pub status: SessionStatus,
    pub host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joiner_name: Option<String>,
    pub move_count: u32,
    pub spectators: u32,
}

/// Pushed to lobby subscribers whenever the set of joinable
/// matchmaking games changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyUpdate {
    #[serde(rename = "lobby")]
    Games { games: Vec<GameSummaryDto> },
}

/// Diffs pushed to live-games subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LiveGamesUpdate {
    #[serde(rename = "snapshot")]
    Snapshot { games: Vec<GameSummaryDto> },
    #[serde(rename = "upsert")]
    Upsert { game: GameSummaryDto },
    #[serde(rename = "remove", rename_all = "camelCase")]
    Remove { game_id: GameId },
}

/// Discovery listing of one bot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSummaryDto {
    pub composite_id: CompositeId,
    pub name: String,
    pub official: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
    /// Set for recommended listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_width: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_height: Option<u8>,
    pub active_games: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_is_kebab() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
    }

    #[test]
    fn live_remove_wire_format() {
        let json = serde_json::to_value(LiveGamesUpdate::Remove {
            game_id: GameId::new("g7"),
        })
        .unwrap();
        assert_eq!(json["type"], "remove");
        assert_eq!(json["gameId"], "g7");
    }
}

// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use super::{BoardDims, Coord, TimeControl, WallAxis, WallMove};
use crate::PlayerNumber;
use serde::{Deserialize, Serialize};

/// Whether moves still apply.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Playing,
    Finished,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Resignation,
    Timeout,
    Draw,
    Abandonment,
}

/// Set exactly when `status` becomes `Finished`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    /// `None` for a draw.
    pub winner: Option<PlayerNumber>,
    pub reason: EndReason,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    pub notation: WallMove,
    pub by: PlayerNumber,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedWall {
    pub at: Coord,
    pub axis: WallAxis,
    pub by: PlayerNumber,
}

/// The authoritative in-game state of one session.
///
/// Mutated only through [`super::apply`] (moves) and the session store
/// (clocks and lifecycle endings).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub turn: PlayerNumber,
    /// Append-only, except that an accepted takeback pops the tail.
    pub moves: Vec<MoveRecord>,
    /// Remaining bank per player, indexed by [`PlayerNumber::index`].
    pub remaining_ms: [u64; 2],
    pub pawns: [Coord; 2],
    pub walls: Vec<PlacedWall>,
    pub status: GameStatus,
    pub result: Option<GameResult>,
}

impl GameState {
    pub fn initial(dims: BoardDims, time_control: TimeControl) -> Self {
        // Pawns start on opposite corners.
        let top_right = Coord::new(dims.width - 1, dims.height - 1);
        Self {
            turn: PlayerNumber::One,
            moves: Vec::new(),
            remaining_ms: [time_control.initial_ms; 2],
            pawns: [Coord::new(0, 0), top_right],
            walls: Vec::new(),
            status: GameStatus::Playing,
            result: None,
        }
    }

    pub fn move_count(&self) -> usize {
        self.moves.len()
    }

    pub fn finish(&mut self, result: GameResult) {
        debug_assert_eq!(self.status, GameStatus::Playing, "finished twice");
        self.status = GameStatus::Finished;
        self.result = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let state = GameState::initial(
            BoardDims {
                width: 3,
                height: 3,
            },
            TimeControl::rapid(),
        );
        assert_eq!(state.turn, PlayerNumber::One);
        assert_eq!(state.pawns[1], Coord::new(2, 2));
        assert_eq!(state.status, GameStatus::Playing);
        assert!(state.result.is_none());
    }
}

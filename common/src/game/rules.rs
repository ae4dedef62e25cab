// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use super::{BoardDims, GameState, GameStatus, MoveRecord, PlacedWall, WallMove};
use crate::PlayerNumber;
use std::fmt::{self, Display, Formatter};

/// Why the rule engine refused a move.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RuleViolation {
    OutOfTurn,
    OutOfBounds,
    WallOccupied,
    GameOver,
}

impl Display for RuleViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OutOfTurn => "not your turn",
            Self::OutOfBounds => "outside the board",
            Self::WallOccupied => "wall already placed there",
            Self::GameOver => "game is over",
        })
    }
}

impl std::error::Error for RuleViolation {}

/// Applies one half-move to the state, or returns it untouched.
///
/// This is the pure seam to the rule engine. Full legality (path
/// blocking, win detection) lives outside the coordination fabric; what
/// is enforced here is turn alternation, bounds, and wall collisions,
/// which is enough to keep the fabric's bookkeeping consistent.
pub fn apply(
    state: &mut GameState,
    dims: BoardDims,
    player: PlayerNumber,
    mv: &WallMove,
) -> Result<(), RuleViolation> {
    if state.status != GameStatus::Playing {
        return Err(RuleViolation::GameOver);
    }
    if state.turn != player {
        return Err(RuleViolation::OutOfTurn);
    }
    match mv {
        WallMove::Pass => {}
        WallMove::Pawn(at) => {
            if !dims.contains(*at) {
                return Err(RuleViolation::OutOfBounds);
            }
            state.pawns[player.index()] = *at;
        }
        WallMove::Wall { at, axis } => {
            if !dims.contains(*at) {
                return Err(RuleViolation::OutOfBounds);
            }
            if state.walls.iter().any(|w| w.at == *at && w.axis == *axis) {
                return Err(RuleViolation::WallOccupied);
            }
            state.walls.push(PlacedWall {
                at: *at,
                axis: *axis,
                by: player,
            });
        }
    }
    state.moves.push(MoveRecord {
        notation: mv.clone(),
        by: player,
    });
    state.turn = player.opponent();
    Ok(())
}

/// Rebuilds a state by replaying `moves` from the initial position.
/// Used for takebacks, which cannot be undone in place.
pub fn replay(
    dims: BoardDims,
    time_control: super::TimeControl,
    remaining_ms: [u64; 2],
    moves: &[MoveRecord],
) -> Result<GameState, RuleViolation> {
    let mut state = GameState::initial(dims, time_control);
    state.remaining_ms = remaining_ms;
    for record in moves {
        apply(&mut state, dims, record.by, &record.notation)?;
    }
    Ok(state)
}

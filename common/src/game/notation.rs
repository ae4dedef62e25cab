// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use super::Coord;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Orientation of a placed wall segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallAxis {
    Horizontal,
    Vertical,
}

impl WallAxis {
    fn suffix(self) -> char {
        match self {
            Self::Horizontal => 'h',
            Self::Vertical => 'v',
        }
    }
}

/// One half-move in wall-game notation.
///
/// The grammar is small: `---` passes, a bare cell (`c3`) moves the pawn
/// there, and a cell with an `h`/`v` suffix (`c3h`) anchors a wall.
/// Legality beyond syntax and bounds lives in the rule engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WallMove {
    Pass,
    Pawn(Coord),
    Wall { at: Coord, axis: WallAxis },
}

/// A move string the parser refused.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MalformedMove(pub String);

impl Display for MalformedMove {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "malformed move notation {:?}", self.0)
    }
}

impl std::error::Error for MalformedMove {}

impl WallMove {
    pub const PASS: &'static str = "---";
}

impl Display for WallMove {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str(Self::PASS),
            Self::Pawn(at) => write!(f, "{at}"),
            Self::Wall { at, axis } => write!(f, "{at}{}", axis.suffix()),
        }
    }
}

impl FromStr for WallMove {
    type Err = MalformedMove;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::PASS {
            return Ok(Self::Pass);
        }
        let malformed = || MalformedMove(s.to_owned());
        let mut chars = s.chars();
        let col = match chars.next() {
            Some(c @ 'a'..='z') => c as u8 - b'a',
            _ => return Err(malformed()),
        };
        let rest = chars.as_str();
        let (digits, axis) = match rest.strip_suffix(['h', 'v']) {
            Some(digits) => {
                let axis = if rest.ends_with('h') {
                    WallAxis::Horizontal
                } else {
                    WallAxis::Vertical
                };
                (digits, Some(axis))
            }
            None => (rest, None),
        };
        if digits.is_empty() || digits.len() > 2 {
            return Err(malformed());
        }
        let row: u8 = digits.parse().map_err(|_| malformed())?;
        if row == 0 {
            return Err(malformed());
        }
        let at = Coord::new(col, row - 1);
        Ok(match axis {
            Some(axis) => Self::Wall { at, axis },
            None => Self::Pawn(at),
        })
    }
}

impl TryFrom<String> for WallMove {
    type Error = MalformedMove;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WallMove> for String {
    fn from(mv: WallMove) -> String {
        mv.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        for s in ["---", "a1", "c3", "e12", "c3h", "b9v"] {
            let mv: WallMove = s.parse().unwrap();
            assert_eq!(mv.to_string(), s);
        }
    }

    #[test]
    fn rejects_garbage() {
        for s in ["", "3c", "c", "c0", "c3x", "C3", "c345", "--", "----"] {
            assert!(s.parse::<WallMove>().is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn json_is_a_plain_string() {
        let mv: WallMove = serde_json::from_str("\"c3h\"").unwrap();
        assert_eq!(
            mv,
            WallMove::Wall {
                at: Coord::new(2, 2),
                axis: WallAxis::Horizontal
            }
        );
        assert_eq!(serde_json::to_string(&mv).unwrap(), "\"c3h\"");
    }
}

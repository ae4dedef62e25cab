// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

mod notation;
mod rules;
mod state;

pub use notation::*;
pub use rules::*;
pub use state::*;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use strum::{Display as EnumDisplay, EnumIter, EnumString};

/// Rule family of a game. The coordination fabric treats these as opaque
/// labels; only the rule engine and bots care about the difference.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    EnumDisplay,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Variant {
    Standard,
    Classic,
    Freestyle,
    Survival,
}

/// Board dimensions in cells.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BoardDims {
    pub width: u8,
    pub height: u8,
}

impl BoardDims {
    /// Columns are written as letters, which caps the width.
    pub const MAX_SIDE: u8 = 25;

    pub fn contains(&self, coord: Coord) -> bool {
        coord.col < self.width && coord.row < self.height
    }

    pub fn area(&self) -> u16 {
        self.width as u16 * self.height as u16
    }
}

impl Display for BoardDims {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One cell, zero-indexed from the bottom-left corner.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub col: u8,
    pub row: u8,
}

impl Coord {
    pub fn new(col: u8, row: u8) -> Self {
        Self { col, row }
    }
}

impl Display for Coord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.col) as char, self.row + 1)
    }
}

/// How a game was arranged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    Friend,
    Matchmaking,
}

/// Fischer clock: starting bank plus per-move increment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeControl {
    pub initial_ms: u64,
    pub increment_ms: u64,
}

impl TimeControl {
    pub fn rapid() -> Self {
        Self {
            initial_ms: 10 * 60 * 1000,
            increment_ms: 5 * 1000,
        }
    }
}

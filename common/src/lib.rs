// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

mod dto;
mod id;
pub mod game;
pub mod protocol;

pub use dto::*;
pub use id::*;

/// Free-form cosmetic preferences (pawn color, board theme, ...). The
/// server never interprets these, it only relays them.
pub type Appearance = serde_json::Value;

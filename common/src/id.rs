// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: LGPL-3.0-or-later

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Length of generated game ids. Short enough to share, long enough to
/// make collisions a non-issue at the scale of one process.
const GAME_ID_LEN: usize = 10;

/// Bytes of entropy behind every capability token (192 bits).
const TOKEN_ENTROPY_BYTES: usize = 24;

fn random_alphanumeric(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }
    };
}

string_id!(
    /// Identifies one game session.
    GameId
);
string_id!(
    /// Identifies a rematch chain; equal to the id of the first game in it.
    SeriesId
);
string_id!(
    /// Client-chosen identifier of a connected bot process.
    ClientId
);
string_id!(
    /// Identifier of one bot within its client, unique per client.
    BotId
);
string_id!(
    /// Identifies a bot game session (usually the game id, or
    /// `<gameId>_<nonce>` for per-viewer replay evaluation).
    BgsId
);

impl GameId {
    pub fn generate() -> Self {
        Self(random_alphanumeric(GAME_ID_LEN))
    }
}

impl SeriesId {
    pub fn of_first_game(game_id: &GameId) -> Self {
        Self(game_id.0.clone())
    }
}

impl BgsId {
    /// The session every subscriber of a live game shares.
    pub fn for_game(game_id: &GameId) -> Self {
        Self(game_id.0.clone())
    }

    /// A throwaway session for replaying a finished game to one viewer.
    pub fn for_replay(game_id: &GameId) -> Self {
        Self(format!("{}_{}", game_id.0, random_alphanumeric(6)))
    }
}

/// The globally-unique handle of a bot: `clientId:botId`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeId(pub String);

impl CompositeId {
    pub fn new(client_id: &ClientId, bot_id: &BotId) -> Self {
        Self(format!("{}:{}", client_id.0, bot_id.0))
    }

    pub fn client_id(&self) -> ClientId {
        match self.0.split_once(':') {
            Some((client, _)) => ClientId::new(client),
            None => ClientId::new(self.0.as_str()),
        }
    }

    pub fn bot_id(&self) -> BotId {
        match self.0.split_once(':') {
            Some((_, bot)) => BotId::new(bot),
            None => BotId::new(""),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CompositeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which of the two players moves first, second, etc.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlayerNumber {
    One,
    Two,
}

impl PlayerNumber {
    pub fn opponent(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

impl From<PlayerNumber> for u8 {
    fn from(n: PlayerNumber) -> u8 {
        match n {
            PlayerNumber::One => 1,
            PlayerNumber::Two => 2,
        }
    }
}

impl TryFrom<u8> for PlayerNumber {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("invalid player number {other}")),
        }
    }
}

impl Display for PlayerNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// An unguessable capability. Used both for the REST seat token and the
/// per-seat WebSocket token.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn generate() -> Self {
        use base64::prelude::*;
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        thread_rng().fill(&mut bytes);
        Self(BASE64_URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_round_trip() {
        let composite = CompositeId::new(&ClientId::new("acme"), &BotId::new("wallbot"));
        assert_eq!(composite.as_str(), "acme:wallbot");
        assert_eq!(composite.client_id(), ClientId::new("acme"));
        assert_eq!(composite.bot_id(), BotId::new("wallbot"));
    }

    #[test]
    fn player_number_wire_format() {
        let two: PlayerNumber = serde_json::from_str("2").unwrap();
        assert_eq!(two, PlayerNumber::Two);
        assert_eq!(serde_json::to_string(&PlayerNumber::One).unwrap(), "1");
        assert!(serde_json::from_str::<PlayerNumber>("3").is_err());
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = AccessToken::generate();
        let b = AccessToken::generate();
        assert_ne!(a, b);
        // 24 bytes of entropy encode to 32 characters.
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn replay_bgs_ids_are_per_viewer() {
        let game = GameId::generate();
        assert_ne!(BgsId::for_replay(&game), BgsId::for_replay(&game));
        assert_eq!(BgsId::for_game(&game).as_str(), game.as_str());
    }
}

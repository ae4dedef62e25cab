// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

mod bot_actlet;
mod eval_actlet;
mod player_actlet;
mod server_actor;
#[cfg(test)]
mod tests;

pub use self::bot_actlet::{
    AttachRejection, BotFrame, BotInvalidMessage, BotPlayError, BotSocketClosed, CreateBotGame,
    ListBots, SubmitBgsRequest, SubmitError, SubmitKind, TryAttach,
};
pub use self::eval_actlet::{EvalRejection, EvalRepo, EvalSubscribe, EvalUnsubscribe};
pub use self::player_actlet::{
    AbortGame, CreateGame, CreatedGame, GameConnect, GameDisconnect, GameFrame, GetGame, JoinGame,
    JoinedGame, LiveSubscribe, LiveUnsubscribe, LobbySubscribe, LobbyUnsubscribe, ReadySeat,
};
pub use self::server_actor::{CoreConfig, ServerActor};

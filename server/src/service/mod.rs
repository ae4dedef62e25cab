// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

mod bgs_repo;
mod bot_registry;
mod broadcast;
mod persist;
mod session_repo;

pub use self::bgs_repo::{
    BgsError, BgsRepo, BgsRequestKind, BgsResponse, BgsStatus, BotGameSession, PendingRequest,
    MAX_BGS_SESSIONS,
};
pub use self::bot_registry::{
    ActiveBotGame, BotClient, BotRegistry, RegisteredBot, Registration, DEFAULT_MAX_CLIENTS,
};
pub use self::broadcast::{EvalSubscriber, GameSubscriber, Topics};
pub use self::persist::{
    elo_delta, FinishedGameRecord, LogPersister, PersistHandle, PersistJob, Persister,
    RatingUpdateRecord, DEFAULT_RATING,
};
pub use self::session_repo::{
    AccessResolution, ActionError, ActionOutcome, CreateParams, GameAction, HostIdentity,
    JoinIdentity, JoinOutcome, JoinerSetup, Seat, SeatRole, Session, SessionError, SessionRepo,
    WaitingReason, GIVE_TIME_MS,
};

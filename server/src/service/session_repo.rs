// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::observer::ConnectionId;
use log::{debug, info};
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};
use wallgame_common::game::{
    self, BoardDims, EndReason, GameResult, GameState, GameStatus, MatchType, RuleViolation,
    TimeControl, Variant, WallMove,
};
use wallgame_common::{
    AccessToken, Appearance, CompositeId, GameId, GameSummaryDto, MatchScoreDto, PlayerNumber,
    SeatView, SeriesId, SessionStatus, SessionView,
};

/// Bank credited to the opponent by a give-time gesture.
pub const GIVE_TIME_MS: u64 = 30_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeatRole {
    Host,
    Joiner,
}

impl SeatRole {
    pub fn other(self) -> Self {
        match self {
            Self::Host => Self::Joiner,
            Self::Joiner => Self::Host,
        }
    }
}

/// One side of a game, inlined in its session.
#[derive(Debug)]
pub struct Seat {
    pub role: SeatRole,
    pub player: PlayerNumber,
    /// REST capability over this seat.
    pub token: AccessToken,
    /// WebSocket capability over this seat.
    pub socket_token: AccessToken,
    pub display_name: String,
    pub connected: bool,
    pub ready: bool,
    pub appearance: Option<Appearance>,
    pub auth_user_id: Option<String>,
    /// Present iff this seat is played by a bot.
    pub bot: Option<CompositeId>,
    pub rating_at_start: Option<f64>,
}

impl Seat {
    fn new(role: SeatRole, player: PlayerNumber, identity: SeatIdentity) -> Self {
        Self {
            role,
            player,
            token: AccessToken::generate(),
            socket_token: AccessToken::generate(),
            display_name: identity.display_name,
            connected: false,
            ready: identity.bot.is_some(),
            appearance: identity.appearance,
            auth_user_id: identity.auth_user_id,
            bot: identity.bot,
            rating_at_start: identity.rating,
        }
    }

    fn reissue_tokens(&mut self) {
        self.token = AccessToken::generate();
        self.socket_token = AccessToken::generate();
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }

    fn view(&self) -> SeatView {
        SeatView {
            player_id: self.player,
            display_name: self.display_name.clone(),
            connected: self.connected,
            ready: self.ready,
            appearance: self.appearance.clone(),
            bot: self.bot.clone(),
            rating: self.rating_at_start,
        }
    }
}

struct SeatIdentity {
    display_name: String,
    appearance: Option<Appearance>,
    auth_user_id: Option<String>,
    bot: Option<CompositeId>,
    rating: Option<f64>,
}

/// Who is creating a game.
pub struct HostIdentity {
    pub display_name: String,
    pub appearance: Option<Appearance>,
    pub auth_user_id: Option<String>,
    pub rating: Option<f64>,
}

impl HostIdentity {
    fn into_seat_identity(self) -> SeatIdentity {
        SeatIdentity {
            display_name: self.display_name,
            appearance: self.appearance,
            auth_user_id: self.auth_user_id,
            bot: None,
            rating: self.rating,
        }
    }
}

/// How the joiner seat starts out.
pub enum JoinerSetup {
    /// Left open for whoever joins first.
    Open,
    /// Filled by a bot at creation.
    Bot {
        composite_id: CompositeId,
        display_name: String,
        appearance: Option<Appearance>,
    },
}

/// Who is joining an existing game.
pub struct JoinIdentity {
    pub display_name: String,
    pub appearance: Option<Appearance>,
    pub auth_user_id: Option<String>,
    pub rating: Option<f64>,
}

/// Immutable configuration of a game.
#[derive(Clone)]
pub struct CreateParams {
    pub variant: Variant,
    pub board: BoardDims,
    pub time_control: TimeControl,
    pub rated: bool,
    pub match_type: MatchType,
    /// Forces the host to move first/second; `None` flips a coin.
    pub host_is_player_one: Option<bool>,
}

/// One game, owned by the repo for its lifetime.
#[derive(Debug)]
pub struct Session {
    pub id: GameId,
    pub series_id: SeriesId,
    pub rematch_number: u32,
    pub variant: Variant,
    pub board: BoardDims,
    pub time_control: TimeControl,
    pub rated: bool,
    pub match_type: MatchType,
    pub status: SessionStatus,
    pub cancelled: bool,
    pub host: Seat,
    pub joiner: Option<Seat>,
    pub game: GameState,
    /// First move of this game; the clock baseline before that is the
    /// moment both seats became ready.
    pub started_at: Option<Instant>,
    turn_started_at: Option<Instant>,
    pub match_score: MatchScoreDto,
    /// Guards match-score awards against double counting.
    last_scored_game: Option<GameId>,
    /// Next game of the series, once a rematch was created.
    pub rematch: Option<GameId>,
    pub pending_draw: Option<PlayerNumber>,
    pub pending_takeback: Option<PlayerNumber>,
    pub pending_rematch: Option<PlayerNumber>,
    pub spectators: u32,
    chat_guests: HashMap<ConnectionId, u32>,
    next_chat_guest: u32,
    pub created_at: Instant,
}

impl Session {
    pub fn seat(&self, player: PlayerNumber) -> Option<&Seat> {
        if self.host.player == player {
            Some(&self.host)
        } else {
            self.joiner.as_ref().filter(|seat| seat.player == player)
        }
    }

    pub fn seat_mut(&mut self, player: PlayerNumber) -> Option<&mut Seat> {
        if self.host.player == player {
            Some(&mut self.host)
        } else {
            self.joiner.as_mut().filter(|seat| seat.player == player)
        }
    }

    pub fn seat_by_role(&self, role: SeatRole) -> Option<&Seat> {
        match role {
            SeatRole::Host => Some(&self.host),
            SeatRole::Joiner => self.joiner.as_ref(),
        }
    }

    pub fn seats(&self) -> impl Iterator<Item = &Seat> {
        std::iter::once(&self.host).chain(self.joiner.iter())
    }

    /// The bot seated in this game, if any.
    pub fn bot_seat(&self) -> Option<&Seat> {
        self.seats().find(|seat| seat.is_bot())
    }

    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::InProgress && self.game.status == GameStatus::Playing
    }

    pub fn seat_with_socket_token(&self, token: &AccessToken) -> Option<&Seat> {
        self.seats().find(|seat| &seat.socket_token == token)
    }

    pub fn seat_with_token(&self, token: &AccessToken) -> Option<&Seat> {
        self.seats().find(|seat| &seat.token == token)
    }

    /// Whether both clocks still tick; then how much the mover has left.
    fn charge_clock(&mut self, player: PlayerNumber, now: Instant) -> bool {
        let Some(turn_started) = self.turn_started_at else {
            return true;
        };
        let elapsed = now.duration_since(turn_started).as_millis() as u64;
        let remaining = &mut self.game.remaining_ms[player.index()];
        if elapsed >= *remaining {
            *remaining = 0;
            return false;
        }
        *remaining -= elapsed;
        *remaining += self.time_control.increment_ms;
        true
    }

    fn award_score(&mut self) {
        let Some(result) = self.game.result else {
            debug_assert!(false, "scoring an unfinished game");
            return;
        };
        if self.last_scored_game.as_ref() == Some(&self.id) {
            return;
        }
        self.last_scored_game = Some(self.id.clone());
        match result.winner {
            Some(winner) => {
                let host_won = self.host.player == winner;
                if host_won {
                    self.match_score.host += 1.0;
                } else {
                    self.match_score.joiner += 1.0;
                }
            }
            None => {
                self.match_score.host += 0.5;
                self.match_score.joiner += 0.5;
            }
        }
    }

    fn finish(&mut self, result: GameResult) {
        self.game.finish(result);
        self.status = SessionStatus::Completed;
        self.turn_started_at = None;
        self.pending_draw = None;
        self.pending_takeback = None;
        self.award_score();
        info!("game {} finished: {:?}", self.id, result);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            game_id: self.id.clone(),
            series_id: self.series_id.clone(),
            rematch_number: self.rematch_number,
            variant: self.variant,
            board_width: self.board.width,
            board_height: self.board.height,
            time_control: self.time_control,
            rated: self.rated,
            match_type: self.match_type,
            status: self.status,
            cancelled: self.cancelled,
            host: self.host.view(),
            joiner: self.joiner.as_ref().map(Seat::view),
            game: self.game.clone(),
            match_score: self.match_score,
            spectators: self.spectators,
        }
    }

    pub fn summary(&self) -> GameSummaryDto {
        GameSummaryDto {
            game_id: self.id.clone(),
            variant: self.variant,
            board_width: self.board.width,
            board_height: self.board.height,
            time_control: self.time_control,
            rated: self.rated,
            match_type: self.match_type,
            status: self.status,
            host_name: self.host.display_name.clone(),
            joiner_name: self.joiner.as_ref().map(|seat| seat.display_name.clone()),
            move_count: self.game.move_count() as u32,
            spectators: self.spectators,
        }
    }

    /// Stable "Guest n" index for an anonymous chatter.
    pub fn chat_guest_name(&mut self, conn_id: ConnectionId) -> String {
        let next = &mut self.next_chat_guest;
        let index = *self.chat_guests.entry(conn_id).or_insert_with(|| {
            *next += 1;
            *next
        });
        format!("Guest {index}")
    }

    pub fn forget_chat_guest(&mut self, conn_id: ConnectionId) {
        self.chat_guests.remove(&conn_id);
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionError {
    NotFound,
    Cancelled,
    NotFinished,
    RematchExists,
    AlreadyStarted,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "no such game",
            Self::Cancelled => "game was cancelled",
            Self::NotFinished => "game is not finished",
            Self::RematchExists => "a rematch already exists",
            Self::AlreadyStarted => "game already started",
        })
    }
}

impl std::error::Error for SessionError {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionError {
    NotFound,
    Cancelled,
    IllegalAction(RuleViolation),
    WrongTurn,
    AlreadyFinished,
}

impl Display for ActionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("no such game"),
            Self::Cancelled => f.write_str("game was cancelled"),
            Self::IllegalAction(violation) => write!(f, "illegal action: {violation}"),
            Self::WrongTurn => f.write_str("not your turn"),
            Self::AlreadyFinished => f.write_str("game already finished"),
        }
    }
}

impl std::error::Error for ActionError {}

/// Player intents the store applies.
#[derive(Clone, Debug)]
pub enum GameAction {
    Move(WallMove),
    Resign,
    /// An agreed draw; the offer dance happens upstream.
    AgreeDraw,
    /// An agreed takeback of the last half-move.
    Takeback,
    GiveTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionOutcome {
    Moved { finished: bool },
    Resigned,
    Drawn,
    TakebackApplied,
    TimeGiven,
}

#[derive(Debug)]
pub enum JoinOutcome {
    /// The joiner seat was filled, or recovered by its owner.
    Player {
        player: PlayerNumber,
        role: SeatRole,
        token: AccessToken,
        socket_token: AccessToken,
    },
    Spectator,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitingReason {
    HostAborted,
    NoJoiner,
}

/// What a caller holding `token`/`auth_user_id` may do with a game.
pub enum AccessResolution {
    Player {
        player: PlayerNumber,
        role: SeatRole,
        token: AccessToken,
        socket_token: AccessToken,
    },
    Waiting {
        reason: WaitingReason,
    },
    Spectator,
    Replay,
    NotFound,
}

/// In-memory authoritative store of every active game. Sole mutator of
/// game state.
#[derive(Default)]
pub struct SessionRepo {
    sessions: HashMap<GameId, Session>,
}

impl SessionRepo {
    pub fn get(&self, id: &GameId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &GameId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn create_session(
        &mut self,
        params: CreateParams,
        host: HostIdentity,
        joiner: JoinerSetup,
    ) -> &Session {
        let host_first = params
            .host_is_player_one
            .unwrap_or_else(|| thread_rng().gen());
        let (host_player, joiner_player) = if host_first {
            (PlayerNumber::One, PlayerNumber::Two)
        } else {
            (PlayerNumber::Two, PlayerNumber::One)
        };

        let mut id = GameId::generate();
        while self.sessions.contains_key(&id) {
            debug_assert!(false, "game id collision");
            id = GameId::generate();
        }

        let host_seat = Seat::new(SeatRole::Host, host_player, host.into_seat_identity());
        let joiner_seat = match joiner {
            JoinerSetup::Open => None,
            JoinerSetup::Bot {
                composite_id,
                display_name,
                appearance,
            } => Some(Seat::new(
                SeatRole::Joiner,
                joiner_player,
                SeatIdentity {
                    display_name,
                    appearance,
                    auth_user_id: None,
                    bot: Some(composite_id),
                    rating: None,
                },
            )),
        };

        let session = Session {
            series_id: SeriesId::of_first_game(&id),
            id: id.clone(),
            rematch_number: 0,
            variant: params.variant,
            board: params.board,
            time_control: params.time_control,
            rated: params.rated,
            match_type: params.match_type,
            status: SessionStatus::Waiting,
            cancelled: false,
            host: host_seat,
            joiner: joiner_seat,
            game: GameState::initial(params.board, params.time_control),
            started_at: None,
            turn_started_at: None,
            match_score: MatchScoreDto::default(),
            last_scored_game: None,
            rematch: None,
            pending_draw: None,
            pending_takeback: None,
            pending_rematch: None,
            spectators: 0,
            chat_guests: HashMap::new(),
            next_chat_guest: 0,
            created_at: Instant::now(),
        };
        info!("created game {id} ({} {})", session.variant, session.board);
        self.sessions.entry(id).or_insert(session)
    }

    pub fn join_session(
        &mut self,
        id: &GameId,
        identity: JoinIdentity,
    ) -> Result<JoinOutcome, SessionError> {
        let session = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        if session.cancelled {
            return Err(SessionError::Cancelled);
        }

        // Seat recovery: the authenticated owner of a seat gets fresh
        // credentials instead of becoming a spectator.
        if let Some(auth) = identity.auth_user_id.as_deref() {
            let owned = session
                .seats()
                .find(|seat| seat.auth_user_id.as_deref() == Some(auth))
                .map(|seat| seat.player);
            if let Some(player) = owned {
                let seat = session.seat_mut(player).unwrap();
                seat.reissue_tokens();
                debug!("seat of {auth} recovered in game {id}");
                return Ok(JoinOutcome::Player {
                    player: seat.player,
                    role: seat.role,
                    token: seat.token.clone(),
                    socket_token: seat.socket_token.clone(),
                });
            }
        }

        if session.joiner.is_none() {
            let joiner_player = session.host.player.opponent();
            let seat = Seat::new(
                SeatRole::Joiner,
                joiner_player,
                SeatIdentity {
                    display_name: identity.display_name,
                    appearance: identity.appearance,
                    auth_user_id: identity.auth_user_id,
                    bot: None,
                    rating: identity.rating,
                },
            );
            let outcome = JoinOutcome::Player {
                player: seat.player,
                role: seat.role,
                token: seat.token.clone(),
                socket_token: seat.socket_token.clone(),
            };
            session.joiner = Some(seat);
            if session.status == SessionStatus::Waiting {
                session.status = SessionStatus::Ready;
            }
            info!("game {id} joined");
            return Ok(outcome);
        }

        Ok(JoinOutcome::Spectator)
    }

    /// Marks a seat ready; returns true when this call started the game.
    pub fn mark_ready(&mut self, id: &GameId, player: PlayerNumber) -> Result<bool, SessionError> {
        let session = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        if session.cancelled {
            return Err(SessionError::Cancelled);
        }
        if session.status == SessionStatus::Completed || session.status == SessionStatus::InProgress
        {
            return Ok(false);
        }
        if let Some(seat) = session.seat_mut(player) {
            seat.ready = true;
        }
        let both_ready =
            session.host.ready && session.joiner.as_ref().is_some_and(|seat| seat.ready);
        if both_ready {
            session.status = SessionStatus::InProgress;
            session.turn_started_at = Some(Instant::now());
            info!("game {id} is underway");
        }
        Ok(both_ready)
    }

    /// Cancels a game that has not started.
    pub fn abort(&mut self, id: &GameId) -> Result<(), SessionError> {
        let session = self.sessions.get_mut(id).ok_or(SessionError::NotFound)?;
        match session.status {
            SessionStatus::Waiting | SessionStatus::Ready => {
                session.cancelled = true;
                info!("game {id} aborted");
                Ok(())
            }
            _ => Err(SessionError::AlreadyStarted),
        }
    }

    pub fn apply_action(
        &mut self,
        id: &GameId,
        player: PlayerNumber,
        action: GameAction,
        now: Instant,
    ) -> Result<ActionOutcome, ActionError> {
        let session = self.sessions.get_mut(id).ok_or(ActionError::NotFound)?;
        if session.cancelled {
            return Err(ActionError::Cancelled);
        }

        // Everything except a give-time gesture needs a running game.
        let playing = session.is_live();
        match action {
            GameAction::GiveTime => {
                if playing {
                    session.game.remaining_ms[player.opponent().index()] += GIVE_TIME_MS;
                }
                return Ok(ActionOutcome::TimeGiven);
            }
            _ if !playing => return Err(ActionError::AlreadyFinished),
            _ => {}
        }

        match action {
            GameAction::Move(mv) => {
                if session.game.move_count() == 0 && session.started_at.is_none() {
                    session.started_at = Some(now);
                }
                if !session.charge_clock(player, now) {
                    session.finish(GameResult {
                        winner: Some(player.opponent()),
                        reason: EndReason::Timeout,
                    });
                    return Ok(ActionOutcome::Moved { finished: true });
                }
                let board = session.board;
                game::apply(&mut session.game, board, player, &mv).map_err(|violation| {
                    match violation {
                        RuleViolation::OutOfTurn => ActionError::WrongTurn,
                        RuleViolation::GameOver => ActionError::AlreadyFinished,
                        other => ActionError::IllegalAction(other),
                    }
                })?;
                session.turn_started_at = Some(now);
                // A move supersedes whatever was on offer.
                session.pending_draw = None;
                session.pending_takeback = None;
                Ok(ActionOutcome::Moved {
                    finished: session.game.status == GameStatus::Finished,
                })
            }
            GameAction::Resign => {
                session.finish(GameResult {
                    winner: Some(player.opponent()),
                    reason: EndReason::Resignation,
                });
                Ok(ActionOutcome::Resigned)
            }
            GameAction::AgreeDraw => {
                session.finish(GameResult {
                    winner: None,
                    reason: EndReason::Draw,
                });
                Ok(ActionOutcome::Drawn)
            }
            GameAction::Takeback => {
                let Some(last) = session.game.moves.last() else {
                    return Err(ActionError::IllegalAction(RuleViolation::OutOfTurn));
                };
                let moves: Vec<_> = session.game.moves[..session.game.moves.len() - 1].to_vec();
                let turn_after = last.by;
                let rebuilt = game::replay(
                    session.board,
                    session.time_control,
                    session.game.remaining_ms,
                    &moves,
                )
                .map_err(ActionError::IllegalAction)?;
                debug_assert_eq!(rebuilt.turn, turn_after);
                session.game = rebuilt;
                session.turn_started_at = Some(now);
                Ok(ActionOutcome::TakebackApplied)
            }
            GameAction::GiveTime => unreachable!("handled above"),
        }
    }

    /// Finishes a live game from outside the rules: resignation on
    /// behalf of a dead bot, abandonment, and the like.
    pub fn finish_externally(
        &mut self,
        id: &GameId,
        winner: Option<PlayerNumber>,
        reason: EndReason,
    ) -> Result<(), ActionError> {
        let session = self.sessions.get_mut(id).ok_or(ActionError::NotFound)?;
        if !session.is_live() {
            return Err(ActionError::AlreadyFinished);
        }
        session.finish(GameResult { winner, reason });
        Ok(())
    }

    pub fn create_rematch(&mut self, previous_id: &GameId) -> Result<&Session, SessionError> {
        let previous = self
            .sessions
            .get(previous_id)
            .ok_or(SessionError::NotFound)?;
        if previous.game.status != GameStatus::Finished {
            return Err(SessionError::NotFinished);
        }
        if previous.rematch.is_some() {
            return Err(SessionError::RematchExists);
        }
        let Some(prev_joiner) = previous.joiner.as_ref() else {
            return Err(SessionError::NotFinished);
        };

        let mut id = GameId::generate();
        while self.sessions.contains_key(&id) {
            id = GameId::generate();
        }

        // The other player starts.
        let host_player = previous.host.player.opponent();
        let host = Seat::new(
            SeatRole::Host,
            host_player,
            SeatIdentity {
                display_name: previous.host.display_name.clone(),
                appearance: previous.host.appearance.clone(),
                auth_user_id: previous.host.auth_user_id.clone(),
                bot: previous.host.bot.clone(),
                rating: previous.host.rating_at_start,
            },
        );
        let joiner = Seat::new(
            SeatRole::Joiner,
            host_player.opponent(),
            SeatIdentity {
                display_name: prev_joiner.display_name.clone(),
                appearance: prev_joiner.appearance.clone(),
                auth_user_id: prev_joiner.auth_user_id.clone(),
                bot: prev_joiner.bot.clone(),
                rating: prev_joiner.rating_at_start,
            },
        );

        let session = Session {
            series_id: previous.series_id.clone(),
            id: id.clone(),
            rematch_number: previous.rematch_number + 1,
            variant: previous.variant,
            board: previous.board,
            time_control: previous.time_control,
            rated: previous.rated,
            match_type: previous.match_type,
            status: SessionStatus::Waiting,
            cancelled: false,
            host,
            joiner: Some(joiner),
            game: GameState::initial(previous.board, previous.time_control),
            started_at: None,
            turn_started_at: None,
            match_score: previous.match_score,
            last_scored_game: previous.last_scored_game.clone(),
            rematch: None,
            pending_draw: None,
            pending_takeback: None,
            pending_rematch: None,
            spectators: 0,
            chat_guests: HashMap::new(),
            next_chat_guest: 0,
            created_at: Instant::now(),
        };
        self.sessions.get_mut(previous_id).unwrap().rematch = Some(id.clone());
        info!("created rematch {id} of {previous_id}");
        Ok(self.sessions.entry(id).or_insert(session))
    }

    /// Deterministic precedence: token match, then auth match (which
    /// re-issues credentials), then status-based classification.
    pub fn resolve_access(
        &mut self,
        id: &GameId,
        token: Option<&AccessToken>,
        auth_user_id: Option<&str>,
    ) -> AccessResolution {
        let Some(session) = self.sessions.get_mut(id) else {
            return AccessResolution::NotFound;
        };

        if let Some(token) = token {
            let matched = session
                .seats()
                .find(|seat| &seat.token == token || &seat.socket_token == token)
                .map(|seat| (seat.player, seat.role, seat.token.clone(), seat.socket_token.clone()));
            if let Some((player, role, token, socket_token)) = matched {
                return AccessResolution::Player {
                    player,
                    role,
                    token,
                    socket_token,
                };
            }
        }

        if let Some(auth) = auth_user_id {
            let owned = session
                .seats()
                .find(|seat| seat.auth_user_id.as_deref() == Some(auth))
                .map(|seat| seat.player);
            if let Some(player) = owned {
                let seat = session.seat_mut(player).unwrap();
                seat.reissue_tokens();
                return AccessResolution::Player {
                    player: seat.player,
                    role: seat.role,
                    token: seat.token.clone(),
                    socket_token: seat.socket_token.clone(),
                };
            }
        }

        if session.cancelled {
            return AccessResolution::Waiting {
                reason: WaitingReason::HostAborted,
            };
        }
        match session.status {
            SessionStatus::Waiting => AccessResolution::Waiting {
                reason: WaitingReason::NoJoiner,
            },
            SessionStatus::Ready | SessionStatus::InProgress => AccessResolution::Spectator,
            SessionStatus::Completed => AccessResolution::Replay,
        }
    }

    /// Finishes every live game whose mover has run out of bank.
    /// Returns the finished ids for downstream broadcasting.
    pub fn sweep_clocks(&mut self, now: Instant) -> Vec<GameId> {
        let mut flagged = Vec::new();
        for session in self.sessions.values_mut() {
            if !session.is_live() {
                continue;
            }
            let Some(turn_started) = session.turn_started_at else {
                continue;
            };
            let mover = session.game.turn;
            let elapsed = now.duration_since(turn_started).as_millis() as u64;
            if elapsed >= session.game.remaining_ms[mover.index()] {
                session.game.remaining_ms[mover.index()] = 0;
                session.finish(GameResult {
                    winner: Some(mover.opponent()),
                    reason: EndReason::Timeout,
                });
                flagged.push(session.id.clone());
            }
        }
        flagged
    }

    /// Joinable matchmaking games, for the lobby feed.
    pub fn lobby_games(&self) -> Vec<GameSummaryDto> {
        let mut games: Vec<&Session> = self
            .sessions
            .values()
            .filter(|session| {
                session.match_type == MatchType::Matchmaking
                    && !session.cancelled
                    && matches!(session.status, SessionStatus::Waiting | SessionStatus::Ready)
            })
            .collect();
        games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        games.into_iter().map(Session::summary).collect()
    }

    /// All in-progress games, for the live feed snapshot.
    pub fn live_games(&self) -> Vec<GameSummaryDto> {
        self.sessions
            .values()
            .filter(|session| session.status == SessionStatus::InProgress)
            .map(Session::summary)
            .collect()
    }

    /// Drops long-finished and long-abandoned games. The persistence
    /// layer owns them by then.
    pub fn prune(&mut self, max_completed_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            let done = session.status == SessionStatus::Completed || session.cancelled;
            // A completed game stays while a rematch could reference it.
            !(done
                && session.rematch.is_none()
                && now.duration_since(session.created_at) > max_completed_age)
        });
        before - self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(host_first: Option<bool>) -> CreateParams {
        CreateParams {
            variant: Variant::Standard,
            board: BoardDims {
                width: 3,
                height: 3,
            },
            time_control: TimeControl::rapid(),
            rated: false,
            match_type: MatchType::Friend,
            host_is_player_one: host_first,
        }
    }

    fn host() -> HostIdentity {
        HostIdentity {
            display_name: "Hosta".to_owned(),
            appearance: None,
            auth_user_id: Some("auth-host".to_owned()),
            rating: None,
        }
    }

    fn joiner() -> JoinIdentity {
        JoinIdentity {
            display_name: "Joina".to_owned(),
            appearance: None,
            auth_user_id: Some("auth-joiner".to_owned()),
            rating: None,
        }
    }

    fn started_game(repo: &mut SessionRepo) -> GameId {
        let id = repo
            .create_session(params(Some(true)), host(), JoinerSetup::Open)
            .id
            .clone();
        repo.join_session(&id, joiner()).unwrap();
        repo.mark_ready(&id, PlayerNumber::One).unwrap();
        assert!(repo.mark_ready(&id, PlayerNumber::Two).unwrap());
        id
    }

    #[test]
    fn seats_get_distinct_players() {
        let mut repo = SessionRepo::default();
        let id = repo
            .create_session(params(Some(false)), host(), JoinerSetup::Open)
            .id
            .clone();
        repo.join_session(&id, joiner()).unwrap();
        let session = repo.get(&id).unwrap();
        assert_eq!(session.host.player, PlayerNumber::Two);
        assert_eq!(session.joiner.as_ref().unwrap().player, PlayerNumber::One);
    }

    #[test]
    fn join_recovers_seat_for_same_auth() {
        let mut repo = SessionRepo::default();
        let id = repo
            .create_session(params(Some(true)), host(), JoinerSetup::Open)
            .id
            .clone();
        let old_token = repo.get(&id).unwrap().host.token.clone();

        let outcome = repo
            .join_session(
                &id,
                JoinIdentity {
                    display_name: "Hosta on a phone".to_owned(),
                    appearance: None,
                    auth_user_id: Some("auth-host".to_owned()),
                    rating: None,
                },
            )
            .unwrap();
        match outcome {
            JoinOutcome::Player { role, token, .. } => {
                assert_eq!(role, SeatRole::Host);
                assert_ne!(token, old_token);
            }
            JoinOutcome::Spectator => panic!("expected seat recovery"),
        }
        // The joiner seat is still open.
        assert!(repo.get(&id).unwrap().joiner.is_none());
    }

    #[test]
    fn third_party_is_a_spectator() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        let outcome = repo
            .join_session(
                &id,
                JoinIdentity {
                    display_name: "Nosy".to_owned(),
                    appearance: None,
                    auth_user_id: None,
                    rating: None,
                },
            )
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Spectator));
    }

    #[test]
    fn join_cancelled_fails() {
        let mut repo = SessionRepo::default();
        let id = repo
            .create_session(params(Some(true)), host(), JoinerSetup::Open)
            .id
            .clone();
        repo.abort(&id).unwrap();
        assert_eq!(
            repo.join_session(&id, joiner()).unwrap_err(),
            SessionError::Cancelled
        );
        assert!(matches!(
            repo.resolve_access(&id, None, None),
            AccessResolution::Waiting {
                reason: WaitingReason::HostAborted
            }
        ));
    }

    #[test]
    fn moves_alternate_and_finish_by_resignation() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        let now = Instant::now();

        repo.apply_action(
            &id,
            PlayerNumber::One,
            GameAction::Move("---".parse().unwrap()),
            now,
        )
        .unwrap();
        assert_eq!(
            repo.apply_action(
                &id,
                PlayerNumber::One,
                GameAction::Move("---".parse().unwrap()),
                now,
            )
            .unwrap_err(),
            ActionError::WrongTurn
        );

        repo.apply_action(&id, PlayerNumber::One, GameAction::Resign, now)
            .unwrap();
        let session = repo.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(
            session.game.result,
            Some(GameResult {
                winner: Some(PlayerNumber::Two),
                reason: EndReason::Resignation,
            })
        );
        // No moves after the end.
        assert_eq!(
            repo.apply_action(
                &id,
                PlayerNumber::Two,
                GameAction::Move("---".parse().unwrap()),
                now,
            )
            .unwrap_err(),
            ActionError::AlreadyFinished
        );
    }

    #[test]
    fn give_time_is_a_noop_on_finished_games() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        let now = Instant::now();
        repo.apply_action(&id, PlayerNumber::One, GameAction::Resign, now)
            .unwrap();
        assert_eq!(
            repo.apply_action(&id, PlayerNumber::Two, GameAction::GiveTime, now)
                .unwrap(),
            ActionOutcome::TimeGiven
        );
    }

    #[test]
    fn give_time_credits_the_opponent() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        let before = repo.get(&id).unwrap().game.remaining_ms;
        repo.apply_action(&id, PlayerNumber::One, GameAction::GiveTime, Instant::now())
            .unwrap();
        let after = repo.get(&id).unwrap().game.remaining_ms;
        assert_eq!(after[1], before[1] + GIVE_TIME_MS);
        assert_eq!(after[0], before[0]);
    }

    #[test]
    fn match_score_is_awarded_exactly_once() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        repo.apply_action(&id, PlayerNumber::Two, GameAction::Resign, Instant::now())
            .unwrap();
        let session = repo.get_mut(&id).unwrap();
        assert_eq!(session.match_score.host, 1.0);
        assert_eq!(session.match_score.joiner, 0.0);
        // A second award attempt is swallowed by the guard.
        session.award_score();
        assert_eq!(session.match_score.host, 1.0);
    }

    #[test]
    fn rematch_swaps_colors_and_carries_score() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        assert_eq!(
            repo.create_rematch(&id).unwrap_err(),
            SessionError::NotFinished
        );
        repo.apply_action(&id, PlayerNumber::Two, GameAction::Resign, Instant::now())
            .unwrap();

        let rematch_id = repo.create_rematch(&id).unwrap().id.clone();
        assert_eq!(repo.create_rematch(&id).unwrap_err(), SessionError::RematchExists);

        let previous = repo.get(&id).unwrap();
        let rematch = repo.get(&rematch_id).unwrap();
        assert_eq!(rematch.series_id, previous.series_id);
        assert_eq!(rematch.rematch_number, 1);
        assert_eq!(rematch.match_score.host, 1.0);
        assert_eq!(rematch.host.player, previous.host.player.opponent());
        assert_ne!(rematch.host.token, previous.host.token);
        assert_eq!(rematch.game.move_count(), 0);
    }

    #[test]
    fn resolve_access_precedence() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        let (token, auth) = {
            let session = repo.get(&id).unwrap();
            (
                session.host.token.clone(),
                session.host.auth_user_id.clone().unwrap(),
            )
        };

        assert!(matches!(
            repo.resolve_access(&id, Some(&token), None),
            AccessResolution::Player {
                role: SeatRole::Host,
                ..
            }
        ));
        // Auth match re-issues, so the old token stops working.
        assert!(matches!(
            repo.resolve_access(&id, None, Some(&auth)),
            AccessResolution::Player { .. }
        ));
        assert!(matches!(
            repo.resolve_access(&id, Some(&token), None),
            AccessResolution::Spectator
        ));

        repo.apply_action(&id, PlayerNumber::One, GameAction::Resign, Instant::now())
            .unwrap();
        assert!(matches!(
            repo.resolve_access(&id, None, None),
            AccessResolution::Replay
        ));
        assert!(matches!(
            repo.resolve_access(&GameId::new("missing"), None, None),
            AccessResolution::NotFound
        ));
    }

    #[test]
    fn takeback_pops_the_last_half_move() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        let now = Instant::now();
        repo.apply_action(
            &id,
            PlayerNumber::One,
            GameAction::Move("b2".parse().unwrap()),
            now,
        )
        .unwrap();
        repo.apply_action(
            &id,
            PlayerNumber::Two,
            GameAction::Move("a3".parse().unwrap()),
            now,
        )
        .unwrap();

        repo.apply_action(&id, PlayerNumber::Two, GameAction::Takeback, now)
            .unwrap();
        let session = repo.get(&id).unwrap();
        assert_eq!(session.game.move_count(), 1);
        assert_eq!(session.game.turn, PlayerNumber::Two);
    }

    #[test]
    fn clock_sweep_flags_the_mover() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        // Nothing has expired yet.
        assert!(repo.sweep_clocks(Instant::now()).is_empty());

        repo.get_mut(&id).unwrap().game.remaining_ms = [5, 5];
        let flagged = repo.sweep_clocks(Instant::now() + Duration::from_secs(1));
        assert_eq!(flagged, vec![id.clone()]);
        let session = repo.get(&id).unwrap();
        assert_eq!(
            session.game.result,
            Some(GameResult {
                winner: Some(PlayerNumber::Two),
                reason: EndReason::Timeout,
            })
        );
    }

    #[test]
    fn started_at_is_set_by_the_first_move() {
        let mut repo = SessionRepo::default();
        let id = started_game(&mut repo);
        assert!(repo.get(&id).unwrap().started_at.is_none());
        repo.apply_action(
            &id,
            PlayerNumber::One,
            GameAction::Move("---".parse().unwrap()),
            Instant::now(),
        )
        .unwrap();
        assert!(repo.get(&id).unwrap().started_at.is_some());
    }
}

// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The human surface: game sockets (moves, offers, chat), the lobby
//! and live feeds, and the thin messages behind the HTTP facade.

use super::server_actor::ServerActor;
use crate::observer::{ConnectionId, Observer};
use crate::service::{
    AccessResolution, CreateParams, GameAction, GameSubscriber, HostIdentity, JoinIdentity,
    JoinOutcome, JoinerSetup, SeatRole, SessionError,
};
use actix::{Context as ActorContext, Handler, Message, MessageResult};
use log::{debug, info, warn};
use std::time::Instant;
use wallgame_common::game::{MatchType, WallMove};
use wallgame_common::protocol::{GameClientMessage, GameServerMessage};
use wallgame_common::{
    AccessToken, GameId, LiveGamesUpdate, LobbyUpdate, PlayerNumber, SessionStatus, SessionView,
};

/// `POST /api/games`.
#[derive(Message)]
#[rtype(result = "CreatedGame")]
pub struct CreateGame {
    pub params: CreateParams,
    pub host: HostIdentity,
}

#[derive(Clone, Debug)]
pub struct CreatedGame {
    pub game_id: GameId,
    pub player: PlayerNumber,
    pub token: AccessToken,
    pub socket_token: AccessToken,
}

impl Handler<CreateGame> for ServerActor {
    type Result = MessageResult<CreateGame>;

    fn handle(&mut self, create: CreateGame, _ctx: &mut ActorContext<Self>) -> Self::Result {
        let announce = create.params.match_type == MatchType::Matchmaking;
        let session = self
            .sessions
            .create_session(create.params, create.host, JoinerSetup::Open);
        let created = CreatedGame {
            game_id: session.id.clone(),
            player: session.host.player,
            token: session.host.token.clone(),
            socket_token: session.host.socket_token.clone(),
        };
        if announce {
            self.broadcast_lobby();
        }
        MessageResult(created)
    }
}

/// `POST /api/games/{id}/join`.
#[derive(Message)]
#[rtype(result = "Result<JoinedGame, SessionError>")]
pub struct JoinGame {
    pub game_id: GameId,
    pub identity: JoinIdentity,
}

#[derive(Clone, Debug)]
pub enum JoinedGame {
    Player {
        player: PlayerNumber,
        role: SeatRole,
        token: AccessToken,
        socket_token: AccessToken,
    },
    Spectator,
}

impl Handler<JoinGame> for ServerActor {
    type Result = Result<JoinedGame, SessionError>;

    fn handle(&mut self, join: JoinGame, _ctx: &mut ActorContext<Self>) -> Self::Result {
        let outcome = self.sessions.join_session(&join.game_id, join.identity)?;
        let joined = match outcome {
            JoinOutcome::Player {
                player,
                role,
                token,
                socket_token,
            } => {
                self.broadcast_state(&join.game_id);
                self.broadcast_lobby();
                JoinedGame::Player {
                    player,
                    role,
                    token,
                    socket_token,
                }
            }
            JoinOutcome::Spectator => JoinedGame::Spectator,
        };
        Ok(joined)
    }
}

/// `POST /api/games/{id}/ready`.
#[derive(Message)]
#[rtype(result = "Result<(), &'static str>")]
pub struct ReadySeat {
    pub game_id: GameId,
    pub token: AccessToken,
}

impl Handler<ReadySeat> for ServerActor {
    type Result = Result<(), &'static str>;

    fn handle(&mut self, ready: ReadySeat, ctx: &mut ActorContext<Self>) -> Self::Result {
        let player = self
            .sessions
            .get(&ready.game_id)
            .ok_or("no such game")?
            .seat_with_token(&ready.token)
            .map(|seat| seat.player)
            .ok_or("not a player of this game")?;
        let started = self
            .sessions
            .mark_ready(&ready.game_id, player)
            .map_err(|_| "game can no longer start")?;
        self.broadcast_state(&ready.game_id);
        if started {
            self.broadcast_lobby();
            self.broadcast_live_upsert(&ready.game_id);
            // A bot seated as player one moves immediately.
            self.maybe_drive_bot(&ready.game_id, ctx);
        }
        Ok(())
    }
}

/// `POST /api/games/{id}/abort`.
#[derive(Message)]
#[rtype(result = "Result<(), &'static str>")]
pub struct AbortGame {
    pub game_id: GameId,
    pub token: AccessToken,
}

impl Handler<AbortGame> for ServerActor {
    type Result = Result<(), &'static str>;

    fn handle(&mut self, abort: AbortGame, _ctx: &mut ActorContext<Self>) -> Self::Result {
        let is_host = self
            .sessions
            .get(&abort.game_id)
            .ok_or("no such game")?
            .host
            .token
            == abort.token;
        if !is_host {
            return Err("only the host can abort");
        }
        self.sessions
            .abort(&abort.game_id)
            .map_err(|_| "game already started")?;
        self.end_bgs(&wallgame_common::BgsId::for_game(&abort.game_id));
        self.broadcast_state(&abort.game_id);
        self.broadcast_lobby();
        Ok(())
    }
}

/// `GET /api/games/{id}`.
#[derive(Message)]
#[rtype(result = "Option<SessionView>")]
pub struct GetGame {
    pub game_id: GameId,
}

impl Handler<GetGame> for ServerActor {
    type Result = Option<SessionView>;

    fn handle(&mut self, get: GetGame, _ctx: &mut ActorContext<Self>) -> Self::Result {
        self.sessions.get(&get.game_id).map(|session| session.view())
    }
}

/// A game socket finished its upgrade.
#[derive(Message)]
#[rtype(result = "Result<Option<PlayerNumber>, &'static str>")]
pub struct GameConnect {
    pub game_id: GameId,
    pub conn_id: ConnectionId,
    pub observer: Observer<GameServerMessage>,
    pub socket_token: Option<AccessToken>,
    pub auth_user_id: Option<String>,
}

impl Handler<GameConnect> for ServerActor {
    type Result = Result<Option<PlayerNumber>, &'static str>;

    fn handle(&mut self, connect: GameConnect, _ctx: &mut ActorContext<Self>) -> Self::Result {
        let resolution = self.sessions.resolve_access(
            &connect.game_id,
            connect.socket_token.as_ref(),
            connect.auth_user_id.as_deref(),
        );
        let seat = match resolution {
            AccessResolution::NotFound => return Err("no such game"),
            AccessResolution::Player { player, .. } => Some(player),
            _ => None,
        };

        let session = self.sessions.get_mut(&connect.game_id).unwrap();
        match seat {
            Some(player) => {
                if let Some(seat) = session.seat_mut(player) {
                    seat.connected = true;
                }
                info!("player {player} connected to {}", connect.game_id);
            }
            None => {
                session.spectators += 1;
                debug!("spectator joined {}", connect.game_id);
            }
        }

        self.topics.subscribe_game(
            connect.game_id.clone(),
            GameSubscriber {
                conn_id: connect.conn_id,
                seat,
                observer: connect.observer,
            },
        );
        // Everyone sees the new connection state; the newcomer's first
        // frame doubles as their initial snapshot.
        self.broadcast_state(&connect.game_id);
        Ok(seat)
    }
}

/// A game socket hung up.
#[derive(Message)]
#[rtype(result = "()")]
pub struct GameDisconnect {
    pub game_id: GameId,
    pub conn_id: ConnectionId,
    pub seat: Option<PlayerNumber>,
}

impl Handler<GameDisconnect> for ServerActor {
    type Result = ();

    fn handle(&mut self, disconnect: GameDisconnect, _ctx: &mut ActorContext<Self>) {
        self.topics
            .unsubscribe_game(&disconnect.game_id, disconnect.conn_id);
        let Some(session) = self.sessions.get_mut(&disconnect.game_id) else {
            return;
        };
        match disconnect.seat {
            Some(player) => {
                if let Some(seat) = session.seat_mut(player) {
                    seat.connected = false;
                }
            }
            None => {
                session.spectators = session.spectators.saturating_sub(1);
                session.forget_chat_guest(disconnect.conn_id);
            }
        }
        self.broadcast_state(&disconnect.game_id);
    }
}

/// One decoded frame from a game socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct GameFrame {
    pub game_id: GameId,
    pub conn_id: ConnectionId,
    pub seat: Option<PlayerNumber>,
    pub message: GameClientMessage,
}

impl Handler<GameFrame> for ServerActor {
    type Result = ();

    fn handle(&mut self, frame: GameFrame, ctx: &mut ActorContext<Self>) {
        let game_id = frame.game_id;
        let conn_id = frame.conn_id;

        // Spectators only chat.
        let player = match (&frame.message, frame.seat) {
            (GameClientMessage::Chat { .. } | GameClientMessage::Ping, _) => frame.seat,
            (_, Some(player)) => Some(player),
            (_, None) => {
                self.topics.send_to_game_conn(
                    &game_id,
                    conn_id,
                    GameServerMessage::Error {
                        message: "spectators cannot play".to_owned(),
                    },
                );
                return;
            }
        };

        match frame.message {
            GameClientMessage::Move { notation } => {
                let player = player.unwrap();
                let mv: WallMove = match notation.parse() {
                    Ok(mv) => mv,
                    Err(err) => {
                        self.topics.send_to_game_conn(
                            &game_id,
                            conn_id,
                            GameServerMessage::Error {
                                message: err.to_string(),
                            },
                        );
                        return;
                    }
                };
                match self
                    .sessions
                    .apply_action(&game_id, player, GameAction::Move(mv), Instant::now())
                {
                    Ok(_) => self.after_move(&game_id, ctx),
                    Err(err) => {
                        self.topics.send_to_game_conn(
                            &game_id,
                            conn_id,
                            GameServerMessage::Error {
                                message: err.to_string(),
                            },
                        );
                    }
                }
            }
            GameClientMessage::Resign => {
                let player = player.unwrap();
                match self
                    .sessions
                    .apply_action(&game_id, player, GameAction::Resign, Instant::now())
                {
                    Ok(_) => self.on_game_finished(&game_id, ctx),
                    Err(err) => {
                        self.topics.send_to_game_conn(
                            &game_id,
                            conn_id,
                            GameServerMessage::Error {
                                message: err.to_string(),
                            },
                        );
                    }
                }
            }
            GameClientMessage::DrawOffer => {
                self.handle_offer(&game_id, conn_id, player.unwrap(), Offer::Draw);
            }
            GameClientMessage::DrawAccept => {
                let player = player.unwrap();
                let offered = self
                    .sessions
                    .get(&game_id)
                    .and_then(|s| s.pending_draw)
                    .is_some_and(|by| by == player.opponent());
                if offered
                    && self
                        .sessions
                        .apply_action(&game_id, player, GameAction::AgreeDraw, Instant::now())
                        .is_ok()
                {
                    self.on_game_finished(&game_id, ctx);
                }
            }
            GameClientMessage::DrawReject => {
                let player = player.unwrap();
                if let Some(session) = self.sessions.get_mut(&game_id) {
                    if session.pending_draw == Some(player.opponent()) {
                        session.pending_draw = None;
                        self.topics.send_to_seat(
                            &game_id,
                            player.opponent(),
                            &GameServerMessage::DrawRejected,
                        );
                    }
                }
            }
            GameClientMessage::TakebackOffer => {
                self.handle_offer(&game_id, conn_id, player.unwrap(), Offer::Takeback);
            }
            GameClientMessage::TakebackAccept => {
                let player = player.unwrap();
                let offered = self
                    .sessions
                    .get(&game_id)
                    .and_then(|s| s.pending_takeback)
                    .is_some_and(|by| by == player.opponent());
                if offered {
                    if let Some(session) = self.sessions.get_mut(&game_id) {
                        session.pending_takeback = None;
                    }
                    match self.sessions.apply_action(
                        &game_id,
                        player,
                        GameAction::Takeback,
                        Instant::now(),
                    ) {
                        Ok(_) => self.broadcast_state(&game_id),
                        Err(err) => debug!("takeback in {game_id} failed: {err}"),
                    }
                }
            }
            GameClientMessage::TakebackReject => {
                let player = player.unwrap();
                if let Some(session) = self.sessions.get_mut(&game_id) {
                    if session.pending_takeback == Some(player.opponent()) {
                        session.pending_takeback = None;
                        self.topics.send_to_seat(
                            &game_id,
                            player.opponent(),
                            &GameServerMessage::TakebackRejected,
                        );
                    }
                }
            }
            GameClientMessage::RematchOffer => {
                self.handle_rematch_offer(&game_id, conn_id, player.unwrap(), ctx);
            }
            GameClientMessage::RematchAccept => {
                let player = player.unwrap();
                let offered = self
                    .sessions
                    .get(&game_id)
                    .and_then(|s| s.pending_rematch)
                    .is_some_and(|by| by == player.opponent());
                if offered {
                    self.start_rematch(&game_id, ctx);
                }
            }
            GameClientMessage::RematchReject => {
                let player = player.unwrap();
                if let Some(session) = self.sessions.get_mut(&game_id) {
                    if session.pending_rematch == Some(player.opponent()) {
                        session.pending_rematch = None;
                        self.topics.send_to_seat(
                            &game_id,
                            player.opponent(),
                            &GameServerMessage::RematchRejected,
                        );
                    }
                }
            }
            GameClientMessage::GiveTime => {
                let player = player.unwrap();
                if self
                    .sessions
                    .apply_action(&game_id, player, GameAction::GiveTime, Instant::now())
                    .is_ok()
                {
                    self.broadcast_state(&game_id);
                }
            }
            GameClientMessage::Chat { message } => {
                let message: String = message.chars().take(280).collect();
                if message.trim().is_empty() {
                    return;
                }
                let from = match player {
                    Some(player) => self
                        .sessions
                        .get(&game_id)
                        .and_then(|s| s.seat(player))
                        .map(|seat| seat.display_name.clone())
                        .unwrap_or_else(|| player.to_string()),
                    None => match self.sessions.get_mut(&game_id) {
                        Some(session) => session.chat_guest_name(conn_id),
                        None => return,
                    },
                };
                self.topics
                    .broadcast_game(&game_id, &GameServerMessage::Chat { from, message });
            }
            GameClientMessage::Ping => {
                self.topics
                    .send_to_game_conn(&game_id, conn_id, GameServerMessage::Pong);
            }
        }
    }
}

#[derive(Copy, Clone)]
enum Offer {
    Draw,
    Takeback,
}

impl ServerActor {
    /// Draw and takeback offers; in bot games the server rejects both
    /// on the bot's behalf without asking it.
    fn handle_offer(
        &mut self,
        game_id: &GameId,
        conn_id: ConnectionId,
        player: PlayerNumber,
        offer: Offer,
    ) {
        let Some(session) = self.sessions.get_mut(game_id) else {
            return;
        };
        if !session.is_live() {
            return;
        }
        let rejected = match offer {
            Offer::Draw => GameServerMessage::DrawRejected,
            Offer::Takeback => GameServerMessage::TakebackRejected,
        };
        if session.bot_seat().is_some() {
            self.topics.send_to_game_conn(game_id, conn_id, rejected);
            return;
        }
        let (pending, outbound) = match offer {
            Offer::Draw => (&mut session.pending_draw, GameServerMessage::DrawOffer),
            Offer::Takeback => (
                &mut session.pending_takeback,
                GameServerMessage::TakebackOffer,
            ),
        };
        if pending.is_some() {
            return;
        }
        *pending = Some(player);
        self.topics.send_opponent_only(game_id, player, &outbound);
    }

    fn handle_rematch_offer(
        &mut self,
        game_id: &GameId,
        conn_id: ConnectionId,
        player: PlayerNumber,
        ctx: &mut ActorContext<Self>,
    ) {
        let Some(session) = self.sessions.get(game_id) else {
            return;
        };
        if session.status != SessionStatus::Completed || session.rematch.is_some() {
            return;
        }
        if let Some(bot_seat) = session.bot_seat() {
            // Bots always accept, provided they are still attached.
            let composite = bot_seat.bot.clone().unwrap();
            if self.registry.bot(&composite).is_none() {
                self.topics
                    .send_to_game_conn(game_id, conn_id, GameServerMessage::RematchRejected);
                return;
            }
            self.start_rematch(game_id, ctx);
            return;
        }
        if let Some(session) = self.sessions.get_mut(game_id) {
            if session.pending_rematch.is_none() {
                session.pending_rematch = Some(player);
                self.topics
                    .send_opponent_only(game_id, player, &GameServerMessage::RematchOffer);
            }
        }
    }

    fn start_rematch(&mut self, game_id: &GameId, ctx: &mut ActorContext<Self>) {
        let rematch = match self.sessions.create_rematch(game_id) {
            Ok(session) => session,
            Err(err) => {
                warn!("rematch of {game_id} failed: {err}");
                return;
            }
        };
        let rematch_id = rematch.id.clone();
        let seats: Vec<(PlayerNumber, AccessToken, AccessToken, bool)> = rematch
            .seats()
            .map(|seat| {
                (
                    seat.player,
                    seat.token.clone(),
                    seat.socket_token.clone(),
                    seat.is_bot(),
                )
            })
            .collect();
        if let Some(session) = self.sessions.get_mut(game_id) {
            session.pending_rematch = None;
        }

        // Old-board players learn their fresh credentials privately.
        // The prior game's seats keep their player numbers on the old
        // topic even though the rematch swaps them.
        for (player, token, socket_token, is_bot) in seats {
            if is_bot {
                continue;
            }
            self.topics.send_to_seat(
                game_id,
                player,
                &GameServerMessage::RematchStarted {
                    game_id: rematch_id.clone(),
                    token: Some(token),
                    socket_token: Some(socket_token),
                },
            );
        }
        self.topics.broadcast_game(
            game_id,
            &GameServerMessage::RematchStarted {
                game_id: rematch_id.clone(),
                token: None,
                socket_token: None,
            },
        );

        self.setup_bot_bgs(&rematch_id, ctx);
        self.broadcast_lobby();
    }
}

/// Lobby feed subscription.
#[derive(Message)]
#[rtype(result = "()")]
pub struct LobbySubscribe {
    pub conn_id: ConnectionId,
    pub observer: Observer<LobbyUpdate>,
}

impl Handler<LobbySubscribe> for ServerActor {
    type Result = ();

    fn handle(&mut self, subscribe: LobbySubscribe, _ctx: &mut ActorContext<Self>) {
        let games = self.sessions.lobby_games();
        crate::observer::observe(&subscribe.observer, LobbyUpdate::Games { games });
        self.topics
            .subscribe_lobby(subscribe.conn_id, subscribe.observer);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LobbyUnsubscribe {
    pub conn_id: ConnectionId,
}

impl Handler<LobbyUnsubscribe> for ServerActor {
    type Result = ();

    fn handle(&mut self, unsubscribe: LobbyUnsubscribe, _ctx: &mut ActorContext<Self>) {
        self.topics.unsubscribe_lobby(unsubscribe.conn_id);
    }
}

/// Live-games feed subscription.
#[derive(Message)]
#[rtype(result = "()")]
pub struct LiveSubscribe {
    pub conn_id: ConnectionId,
    pub observer: Observer<LiveGamesUpdate>,
}

impl Handler<LiveSubscribe> for ServerActor {
    type Result = ();

    fn handle(&mut self, subscribe: LiveSubscribe, _ctx: &mut ActorContext<Self>) {
        let games = self.sessions.live_games();
        crate::observer::observe(&subscribe.observer, LiveGamesUpdate::Snapshot { games });
        self.topics
            .subscribe_live(subscribe.conn_id, subscribe.observer);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct LiveUnsubscribe {
    pub conn_id: ConnectionId,
}

impl Handler<LiveUnsubscribe> for ServerActor {
    type Result = ();

    fn handle(&mut self, unsubscribe: LiveUnsubscribe, _ctx: &mut ActorContext<Self>) {
        self.topics.unsubscribe_live(unsubscribe.conn_id);
    }
}

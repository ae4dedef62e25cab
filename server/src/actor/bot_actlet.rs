// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The custom-bot surface: attach validation, the per-session
//! request/response correlator, discovery, and the task that plays a
//! bot's turns through its bot game session.

use super::eval_actlet::EvalStepDone;
use super::player_actlet::CreatedGame;
use super::server_actor::ServerActor;
use crate::observer::{observe, observe_close, ConnectionId, Observer};
use crate::service::{
    ActiveBotGame, BgsError, BgsRequestKind, BgsResponse, BotClient, CreateParams, GameAction,
    HostIdentity, JoinerSetup, RegisteredBot, Registration, MAX_BGS_SESSIONS,
};
use actix::{Addr, AsyncContext, Context as ActorContext, Handler, Message};
use constant_time_eq::constant_time_eq;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use wallgame_common::game::{EndReason, Variant, WallMove};
use wallgame_common::protocol::{
    AttachLimits, AttachRejectCode, BotClientMessage, BotConfig, BotServerMessage, ClientInfo,
    EvalEntry, CLOSE_NORMAL, CLOSE_POLICY, MAX_MESSAGE_BYTES, MIN_CLIENT_MESSAGE_INTERVAL_MS,
    PROTOCOL_VERSION,
};
use wallgame_common::{BgsId, BotSummaryDto, ClientId, CompositeId, GameId};

/// Strikes before a misbehaving connection is closed.
pub const UNEXPECTED_MESSAGE_LIMIT: u32 = 100;

/// How long a bot has to answer one correlated request.
const BGS_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `attach`, pre-validated only for being the first frame.
#[derive(Message)]
#[rtype(result = "Result<(), AttachRejection>")]
pub struct TryAttach {
    pub conn_id: ConnectionId,
    pub observer: Observer<BotServerMessage>,
    pub protocol_version: u32,
    pub client_id: ClientId,
    pub bots: Vec<BotConfig>,
    pub client: ClientInfo,
}

#[derive(Clone, Debug)]
pub struct AttachRejection {
    pub code: AttachRejectCode,
    pub message: String,
}

impl AttachRejection {
    fn new(code: AttachRejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Handler<TryAttach> for ServerActor {
    type Result = Result<(), AttachRejection>;

    fn handle(&mut self, attach: TryAttach, _ctx: &mut ActorContext<Self>) -> Self::Result {
        self.validate_attach(&attach)?;

        let TryAttach {
            conn_id,
            observer,
            client_id,
            bots,
            client,
            ..
        } = attach;

        let secret = self.config.official_secret.as_deref();
        let bots: HashMap<_, _> = bots
            .into_iter()
            .map(|config| {
                let official = match (config.official_token.as_deref(), secret) {
                    (Some(token), Some(secret)) => {
                        constant_time_eq(token.as_bytes(), secret.as_bytes())
                    }
                    _ => false,
                };
                let bot = RegisteredBot {
                    composite_id: CompositeId::new(&client_id, &config.bot_id),
                    config,
                    official,
                    active_games: HashMap::new(),
                };
                (bot.composite_id.bot_id(), bot)
            })
            .collect();

        let registration = self.registry.register(BotClient {
            client_id,
            info: client,
            conn_id,
            observer: observer.clone(),
            bots,
            attached_at: Instant::now(),
            invalid_messages: 0,
            active_bgs: HashSet::new(),
        });
        if let Registration::Replaced(existing) = registration {
            observe_close(&existing.observer, CLOSE_NORMAL);
        }

        observe(
            &observer,
            BotServerMessage::Attached {
                protocol_version: PROTOCOL_VERSION,
                server_time: unix_millis(),
                server: self.config.server_info.clone(),
                limits: AttachLimits {
                    max_message_bytes: MAX_MESSAGE_BYTES,
                    min_client_message_interval_ms: MIN_CLIENT_MESSAGE_INTERVAL_MS,
                },
            },
        );
        Ok(())
    }
}

impl ServerActor {
    /// The checks run in wire order; the first failure names the code.
    fn validate_attach(&self, attach: &TryAttach) -> Result<(), AttachRejection> {
        if attach.protocol_version != PROTOCOL_VERSION {
            return Err(AttachRejection::new(
                AttachRejectCode::ProtocolUnsupported,
                format!(
                    "protocol version {} is not supported, this server speaks {PROTOCOL_VERSION}",
                    attach.protocol_version
                ),
            ));
        }
        if attach.client.name.trim().is_empty() || attach.client.version.trim().is_empty() {
            return Err(AttachRejection::new(
                AttachRejectCode::InvalidMessage,
                "client name and version must be non-empty",
            ));
        }
        if attach.client_id.as_str().is_empty() {
            return Err(AttachRejection::new(
                AttachRejectCode::InvalidMessage,
                "clientId must be non-empty",
            ));
        }
        if attach.bots.is_empty() {
            return Err(AttachRejection::new(
                AttachRejectCode::NoBots,
                "bots must be non-empty",
            ));
        }
        for config in &attach.bots {
            if let Err(reason) = config.validate() {
                return Err(AttachRejection::new(
                    AttachRejectCode::InvalidBotConfig,
                    format!("bot {:?}: {reason}", config.bot_id.as_str()),
                ));
            }
        }
        let mut seen = HashSet::new();
        for config in &attach.bots {
            if !seen.insert(&config.bot_id) {
                return Err(AttachRejection::new(
                    AttachRejectCode::DuplicateBotId,
                    format!("duplicate botId {:?}", config.bot_id.as_str()),
                ));
            }
        }
        let secret = self.config.official_secret.as_deref();
        for config in &attach.bots {
            if let Some(token) = config.official_token.as_deref() {
                let valid = secret
                    .is_some_and(|secret| constant_time_eq(token.as_bytes(), secret.as_bytes()));
                if !valid {
                    return Err(AttachRejection::new(
                        AttachRejectCode::InvalidOfficialToken,
                        "officialToken does not match",
                    ));
                }
            }
        }
        if self.registry.at_capacity(&attach.client_id) {
            return Err(AttachRejection::new(
                AttachRejectCode::TooManyClients,
                "too many bot clients connected",
            ));
        }
        Ok(())
    }

    /// Counts protocol garbage from an attached client and closes the
    /// socket once the budget runs out.
    pub(crate) fn note_unexpected(&mut self, client_id: &ClientId) {
        let count = self.registry.note_invalid(client_id);
        if count == UNEXPECTED_MESSAGE_LIMIT {
            warn!("bot client {client_id} exceeded the unexpected-message limit, closing");
            if let Some(client) = self.registry.get(client_id) {
                observe_close(&client.observer, CLOSE_POLICY);
            }
        }
    }
}

/// A decoded frame from an attached client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct BotFrame {
    pub client_id: ClientId,
    pub conn_id: ConnectionId,
    pub message: BotClientMessage,
}

/// An oversized or undecodable frame from an attached client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct BotInvalidMessage {
    pub client_id: ClientId,
}

impl Handler<BotInvalidMessage> for ServerActor {
    type Result = ();

    fn handle(&mut self, msg: BotInvalidMessage, _ctx: &mut ActorContext<Self>) {
        self.note_unexpected(&msg.client_id);
    }
}

enum BotResponsePayload {
    Started {
        success: bool,
        error: Option<String>,
    },
    Evaluated {
        ply: u32,
        best_move: String,
        evaluation: f32,
        success: bool,
        error: Option<String>,
    },
    MoveApplied {
        success: bool,
        error: Option<String>,
    },
}

impl BotResponsePayload {
    fn kind(&self) -> BgsRequestKind {
        match self {
            Self::Started { .. } => BgsRequestKind::Start,
            Self::Evaluated { .. } => BgsRequestKind::Evaluate,
            Self::MoveApplied { .. } => BgsRequestKind::ApplyMove,
        }
    }
}

impl Handler<BotFrame> for ServerActor {
    type Result = ();

    fn handle(&mut self, frame: BotFrame, _ctx: &mut ActorContext<Self>) {
        let client_id = frame.client_id;
        match frame.message {
            BotClientMessage::Attach { .. } => {
                debug!("{client_id} sent attach while attached");
                self.note_unexpected(&client_id);
            }
            BotClientMessage::GameSessionStarted {
                bgs_id,
                success,
                error,
            } => {
                self.on_bot_response(
                    &client_id,
                    &bgs_id,
                    BotResponsePayload::Started { success, error },
                );
            }
            BotClientMessage::GameSessionEnded { bgs_id, success, .. } => {
                // Ends are not correlated; the session is gone as soon
                // as the server decides so. The ack is informational.
                debug!("{client_id} acknowledged end of {bgs_id} (success={success})");
            }
            BotClientMessage::EvaluateResponse {
                bgs_id,
                ply,
                best_move,
                evaluation,
                success,
                error,
            } => {
                self.on_bot_response(
                    &client_id,
                    &bgs_id,
                    BotResponsePayload::Evaluated {
                        ply,
                        best_move,
                        evaluation,
                        success,
                        error,
                    },
                );
            }
            BotClientMessage::MoveApplied {
                bgs_id,
                ply: _,
                success,
                error,
            } => {
                self.on_bot_response(
                    &client_id,
                    &bgs_id,
                    BotResponsePayload::MoveApplied { success, error },
                );
            }
        }
    }
}

impl ServerActor {
    /// The receiving half of the correlator: validates the response
    /// against the session's single pending slot and resolves it.
    fn on_bot_response(
        &mut self,
        client_id: &ClientId,
        bgs_id: &BgsId,
        payload: BotResponsePayload,
    ) {
        let Some(session) = self.bgs.get(bgs_id) else {
            // Usually a response that lost the race against a timeout
            // or the end of the session.
            debug!("late response for unknown session {bgs_id} from {client_id}");
            return;
        };
        if &session.composite_id.client_id() != client_id {
            warn!("{client_id} answered for {bgs_id}, which it does not serve");
            self.note_unexpected(client_id);
            return;
        }
        let Some(pending_kind) = session.pending.as_ref().map(|p| p.kind) else {
            debug!("late response for {bgs_id}, nothing pending");
            return;
        };
        if pending_kind != payload.kind() {
            warn!(
                "{bgs_id}: expected a {pending_kind:?} response, got {:?}; ignoring",
                payload.kind()
            );
            return;
        }

        let pending = self.bgs.take_pending(bgs_id).unwrap();
        let result = match payload {
            BotResponsePayload::Started { success, error } => {
                if success {
                    self.bgs.mark_ready(bgs_id);
                    Ok(BgsResponse::Started)
                } else {
                    Err(BgsError::Refused(error.unwrap_or_default()))
                }
            }
            BotResponsePayload::Evaluated {
                ply,
                best_move,
                evaluation,
                success,
                error,
            } => {
                if success {
                    if ply != pending.expected_ply {
                        warn!(
                            "{bgs_id}: evaluation for ply {ply}, expected {}; accepting",
                            pending.expected_ply
                        );
                    }
                    let entry = EvalEntry {
                        ply,
                        evaluation: evaluation.clamp(-1.0, 1.0),
                        best_move,
                    };
                    self.bgs.append_history(bgs_id, entry.clone());
                    Ok(BgsResponse::Evaluated(entry))
                } else {
                    Err(BgsError::Refused(error.unwrap_or_default()))
                }
            }
            BotResponsePayload::MoveApplied { success, error } => {
                if success {
                    let ply = pending.expected_ply + 1;
                    self.bgs.update_current_ply(bgs_id, ply);
                    Ok(BgsResponse::MoveApplied { ply })
                } else {
                    Err(BgsError::Refused(error.unwrap_or_default()))
                }
            }
        };
        let _ = pending.resolver.send(result);
    }
}

/// One correlated request; resolves through the returned receiver
/// within the 10 s budget or not at all.
#[derive(Message)]
#[rtype(result = "Result<oneshot::Receiver<Result<BgsResponse, BgsError>>, SubmitError>")]
pub struct SubmitBgsRequest {
    pub bgs_id: BgsId,
    pub kind: SubmitKind,
}

#[derive(Clone, Debug)]
pub enum SubmitKind {
    Start,
    Evaluate { expected_ply: u32 },
    ApplyMove { expected_ply: u32, mv: String },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubmitError {
    UnknownSession,
    /// The single request slot is taken.
    Busy,
    BotGone,
}

impl Handler<SubmitBgsRequest> for ServerActor {
    type Result = Result<oneshot::Receiver<Result<BgsResponse, BgsError>>, SubmitError>;

    fn handle(&mut self, request: SubmitBgsRequest, ctx: &mut ActorContext<Self>) -> Self::Result {
        let bgs_id = request.bgs_id;
        let session = self.bgs.get(&bgs_id).ok_or(SubmitError::UnknownSession)?;
        let observer = self
            .registry
            .observer_of(&session.composite_id)
            .ok_or(SubmitError::BotGone)?;

        let (kind, expected_ply, frame) = match request.kind {
            SubmitKind::Start => (
                BgsRequestKind::Start,
                0,
                BotServerMessage::StartGameSession {
                    bgs_id: bgs_id.clone(),
                    bot_id: session.bot_id.clone(),
                    config: session.config.clone(),
                },
            ),
            SubmitKind::Evaluate { expected_ply } => (
                BgsRequestKind::Evaluate,
                expected_ply,
                BotServerMessage::EvaluatePosition {
                    bgs_id: bgs_id.clone(),
                    expected_ply,
                },
            ),
            SubmitKind::ApplyMove { expected_ply, mv } => (
                BgsRequestKind::ApplyMove,
                expected_ply,
                BotServerMessage::ApplyMove {
                    bgs_id: bgs_id.clone(),
                    expected_ply,
                    mv,
                },
            ),
        };

        let (tx, rx) = oneshot::channel();
        let seq = self
            .bgs
            .set_pending(&bgs_id, kind, expected_ply, tx)
            .ok_or(SubmitError::Busy)?;
        if !observe(&observer, frame) {
            // The socket task is gone; undo the claim.
            self.bgs.take_pending_if_seq(&bgs_id, seq);
            return Err(SubmitError::BotGone);
        }

        ctx.run_later(BGS_REQUEST_TIMEOUT, move |act, _ctx| {
            act.on_bgs_timeout(&bgs_id, seq);
        });
        Ok(rx)
    }
}

impl ServerActor {
    fn on_bgs_timeout(&mut self, bgs_id: &BgsId, seq: u64) {
        let Some(pending) = self.bgs.take_pending_if_seq(bgs_id, seq) else {
            return;
        };
        warn!("request {:?} on {bgs_id} timed out", pending.kind);
        let kind = pending.kind;
        let _ = pending.resolver.send(Err(BgsError::Timeout));
        if kind == BgsRequestKind::Start {
            // A bot that cannot start a session does not keep it.
            self.end_bgs(bgs_id);
        }
    }
}

/// The socket task saw the connection die.
#[derive(Message)]
#[rtype(result = "()")]
pub struct BotSocketClosed {
    pub client_id: ClientId,
    pub conn_id: ConnectionId,
}

impl Handler<BotSocketClosed> for ServerActor {
    type Result = ();

    fn handle(&mut self, closed: BotSocketClosed, ctx: &mut ActorContext<Self>) {
        let Some(client) = self.registry.get(&closed.client_id) else {
            return;
        };
        if client.conn_id != closed.conn_id {
            // A replaced socket reporting its own demise.
            return;
        }
        info!("bot client {} disconnected", closed.client_id);

        let composites: Vec<CompositeId> = client
            .bots
            .values()
            .map(|bot| bot.composite_id.clone())
            .collect();
        let abandoned_games: Vec<(GameId, CompositeId)> = client
            .bots
            .values()
            .flat_map(|bot| {
                bot.active_games
                    .keys()
                    .map(|game_id| (game_id.clone(), bot.composite_id.clone()))
            })
            .collect();

        // In-flight conversations die first, then the games resign.
        let mut dead_bgs = Vec::new();
        for composite in &composites {
            dead_bgs.extend(
                self.bgs
                    .end_all_for_bot(composite, BgsError::ClientDisconnected)
                    .into_iter()
                    .map(|session| (session.game_id.clone(), session.bgs_id)),
            );
        }

        for (game_id, composite) in abandoned_games {
            let live = self.sessions.get(&game_id).is_some_and(|s| s.is_live());
            if !live {
                continue;
            }
            let winner = self.sessions.get(&game_id).and_then(|session| {
                session
                    .seats()
                    .find(|seat| seat.bot.as_ref() == Some(&composite))
                    .map(|seat| seat.player.opponent())
            });
            if self
                .sessions
                .finish_externally(&game_id, winner, EndReason::Resignation)
                .is_ok()
            {
                self.on_game_finished(&game_id, ctx);
            }
        }

        // Shared eval sessions this client was serving are broken; let
        // future subscribers start over with another provider.
        for (game_id, bgs_id) in dead_bgs {
            self.evals.on_bgs_died(&game_id, &bgs_id, &mut self.topics);
        }

        self.registry.unregister(&closed.client_id);
    }
}

/// `GET /api/bots` and `GET /api/bots/recommended`.
#[derive(Message)]
#[rtype(result = "Vec<BotSummaryDto>")]
pub struct ListBots {
    pub variant: Variant,
    pub board: Option<(u8, u8)>,
    pub username: Option<String>,
    pub recommended: bool,
}

impl Handler<ListBots> for ServerActor {
    type Result = Vec<BotSummaryDto>;

    fn handle(&mut self, list: ListBots, _ctx: &mut ActorContext<Self>) -> Self::Result {
        if list.recommended {
            self.registry
                .list_recommended(list.variant, list.username.as_deref())
        } else {
            self.registry
                .list_matching(list.variant, list.board, list.username.as_deref())
        }
    }
}

/// `POST /api/bots/play`: a game against a chosen bot.
#[derive(Message)]
#[rtype(result = "Result<CreatedGame, BotPlayError>")]
pub struct CreateBotGame {
    pub params: CreateParams,
    pub host: HostIdentity,
    pub composite_id: CompositeId,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BotPlayError {
    BotNotFound,
    UnsupportedBoard,
    Capacity,
}

impl std::fmt::Display for BotPlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BotNotFound => "no such bot is connected",
            Self::UnsupportedBoard => "the bot does not support this board",
            Self::Capacity => "bot session capacity reached",
        })
    }
}

impl Handler<CreateBotGame> for ServerActor {
    type Result = Result<CreatedGame, BotPlayError>;

    fn handle(&mut self, create: CreateBotGame, ctx: &mut ActorContext<Self>) -> Self::Result {
        let bot = self
            .registry
            .bot(&create.composite_id)
            .ok_or(BotPlayError::BotNotFound)?;
        let supported = bot
            .config
            .variants
            .get(&create.params.variant)
            .is_some_and(|support| {
                support.supports_board(create.params.board.width, create.params.board.height)
            });
        if !supported {
            return Err(BotPlayError::UnsupportedBoard);
        }
        if self.bgs.len() >= MAX_BGS_SESSIONS {
            return Err(BotPlayError::Capacity);
        }

        let bot_name = bot.config.name.clone();
        let bot_appearance = bot.config.appearance.clone();
        let session = self.sessions.create_session(
            create.params.clone(),
            create.host,
            JoinerSetup::Bot {
                composite_id: create.composite_id.clone(),
                display_name: bot_name,
                appearance: bot_appearance,
            },
        );
        let game_id = session.id.clone();
        let created = CreatedGame {
            game_id: game_id.clone(),
            player: session.host.player,
            token: session.host.token.clone(),
            socket_token: session.host.socket_token.clone(),
        };

        let started = self.setup_bot_bgs(&game_id, ctx);
        debug_assert!(started, "fresh id and capacity were checked");

        Ok(created)
    }
}

impl ServerActor {
    /// Creates and initializes the bot game session backing a game
    /// whose joiner (or host) seat is a bot. Shared by game creation
    /// and rematches.
    pub(crate) fn setup_bot_bgs(&mut self, game_id: &GameId, ctx: &mut ActorContext<Self>) -> bool {
        let Some(session) = self.sessions.get(game_id) else {
            return false;
        };
        let Some(bot_seat) = session.bot_seat() else {
            return false;
        };
        let composite_id = bot_seat.bot.clone().unwrap();
        let bot_player = bot_seat.player;
        let opponent_name = session
            .seats()
            .find(|seat| !seat.is_bot())
            .map(|seat| seat.display_name.clone())
            .unwrap_or_default();
        let config = wallgame_common::protocol::BgsConfig {
            variant: session.variant,
            board_width: session.board.width,
            board_height: session.board.height,
        };

        let bgs_id = BgsId::for_game(game_id);
        if self
            .bgs
            .create(bgs_id.clone(), composite_id.clone(), game_id.clone(), config)
            .is_none()
        {
            return false;
        }
        if let Some(bot) = self.registry.bot_mut(&composite_id) {
            bot.active_games.insert(
                game_id.clone(),
                ActiveBotGame {
                    player: bot_player,
                    opponent_name,
                    started_at: Instant::now(),
                },
            );
        }
        if let Some(client) = self.registry.get_mut(&composite_id.client_id()) {
            client.active_bgs.insert(bgs_id.clone());
        }

        // Bring the session up and score the initial position off-actor.
        tokio::spawn(initialize_bot_game(ctx.address(), game_id.clone(), bgs_id));
        true
    }
}

/// Start + baseline evaluation for a freshly created bot game.
async fn initialize_bot_game(addr: Addr<ServerActor>, game_id: GameId, bgs_id: BgsId) {
    let started = submit_and_await(&addr, bgs_id.clone(), SubmitKind::Start).await;
    let ok = match started {
        Ok(BgsResponse::Started) => {
            matches!(
                submit_and_await(&addr, bgs_id.clone(), SubmitKind::Evaluate { expected_ply: 0 })
                    .await,
                Ok(BgsResponse::Evaluated(_))
            )
        }
        _ => false,
    };
    if ok {
        addr.do_send(BotGameInitialized { game_id });
    } else {
        addr.do_send(BotGameInitFailed { game_id });
    }
}

/// The session is ready and the initial position is scored; the bot
/// may be due to move already.
#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct BotGameInitialized {
    pub game_id: GameId,
}

impl Handler<BotGameInitialized> for ServerActor {
    type Result = ();

    fn handle(&mut self, init: BotGameInitialized, ctx: &mut ActorContext<Self>) {
        self.maybe_drive_bot(&init.game_id, ctx);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct BotGameInitFailed {
    pub game_id: GameId,
}

impl Handler<BotGameInitFailed> for ServerActor {
    type Result = ();

    fn handle(&mut self, failed: BotGameInitFailed, ctx: &mut ActorContext<Self>) {
        warn!("bot game {} failed to initialize", failed.game_id);
        self.end_bgs(&BgsId::for_game(&failed.game_id));
        let Some(session) = self.sessions.get(&failed.game_id) else {
            return;
        };
        if session.is_live() {
            let winner = session
                .seats()
                .find(|seat| !seat.is_bot())
                .map(|seat| seat.player);
            if self
                .sessions
                .finish_externally(&failed.game_id, winner, EndReason::Abandonment)
                .is_ok()
            {
                self.on_game_finished(&failed.game_id, ctx);
            }
        } else if self.sessions.abort(&failed.game_id).is_ok() {
            self.broadcast_state(&failed.game_id);
            self.broadcast_lobby();
        }
    }
}

/// What the bot-turn driver should do next.
#[derive(Clone, Debug)]
pub(crate) enum BotStep {
    /// Catch the session up with a move already played in the game.
    Apply { bgs_id: BgsId, ply: u32, mv: String },
    /// Score the current position; the bot is to move, so the answer
    /// doubles as its chosen move.
    Evaluate { bgs_id: BgsId, ply: u32 },
    /// The current position is already scored; play its best move.
    Play { notation: String },
}

#[derive(Message)]
#[rtype(result = "Option<BotStep>")]
pub(crate) struct PlanBotStep {
    pub game_id: GameId,
}

impl Handler<PlanBotStep> for ServerActor {
    type Result = Option<BotStep>;

    fn handle(&mut self, plan: PlanBotStep, _ctx: &mut ActorContext<Self>) -> Self::Result {
        let session = self.sessions.get(&plan.game_id)?;
        if !session.is_live() {
            return None;
        }
        let bot_player = session.bot_seat()?.player;
        let bgs_id = BgsId::for_game(&plan.game_id);
        let bgs = self.bgs.get(&bgs_id)?;
        if bgs.pending.is_some() {
            // Initialization has not drained yet; come back later.
            return None;
        }

        let ply = bgs.current_ply;
        if (ply as usize) < session.game.move_count() {
            let mv = session.game.moves[ply as usize].notation.to_string();
            return Some(BotStep::Apply { bgs_id, ply, mv });
        }
        if session.game.turn != bot_player {
            return None;
        }
        match bgs.evaluation_at_current_ply() {
            Some(entry) => Some(BotStep::Play {
                notation: entry.best_move.clone(),
            }),
            None => Some(BotStep::Evaluate { bgs_id, ply }),
        }
    }
}

/// Applies the bot's chosen move to the game proper. Resolves to
/// whether the move was actually applied.
#[derive(Message)]
#[rtype(result = "bool")]
pub(crate) struct PlayBotMove {
    pub game_id: GameId,
    pub notation: String,
}

impl Handler<PlayBotMove> for ServerActor {
    type Result = bool;

    fn handle(&mut self, play: PlayBotMove, ctx: &mut ActorContext<Self>) -> Self::Result {
        let Some(session) = self.sessions.get(&play.game_id) else {
            return false;
        };
        let Some(bot_player) = session.bot_seat().map(|seat| seat.player) else {
            return false;
        };
        let mv: WallMove = match play.notation.parse() {
            Ok(mv) => mv,
            Err(err) => {
                warn!("bot played unparseable move in {}: {err}", play.game_id);
                return false;
            }
        };
        match self.sessions.apply_action(
            &play.game_id,
            bot_player,
            GameAction::Move(mv),
            Instant::now(),
        ) {
            Ok(_) => {
                self.after_move(&play.game_id, ctx);
                true
            }
            Err(err) => {
                // The human may have resigned while the bot thought.
                debug!("bot move in {} not applied: {err}", play.game_id);
                false
            }
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct BotDriveFinished {
    pub game_id: GameId,
    /// The driver hit a failure it cannot progress past; respawning
    /// would only spin.
    pub stuck: bool,
}

impl Handler<BotDriveFinished> for ServerActor {
    type Result = ();

    fn handle(&mut self, finished: BotDriveFinished, ctx: &mut ActorContext<Self>) {
        self.bot_driving.remove(&finished.game_id);
        // The driver may have bowed out while a request was in flight;
        // if work is waiting now, pick it back up.
        if !finished.stuck && self.bot_work_pending(&finished.game_id) {
            self.maybe_drive_bot(&finished.game_id, ctx);
        }
    }
}

impl ServerActor {
    /// Whether the bot-turn driver would have something to do.
    fn bot_work_pending(&self, game_id: &GameId) -> bool {
        let Some(session) = self.sessions.get(game_id) else {
            return false;
        };
        let Some(bot_player) = session.bot_seat().map(|seat| seat.player) else {
            return false;
        };
        let Some(bgs) = self.bgs.get(&BgsId::for_game(game_id)) else {
            return false;
        };
        session.is_live()
            && bgs.pending.is_none()
            && ((bgs.current_ply as usize) < session.game.move_count()
                || session.game.turn == bot_player)
    }

    /// Spawns the bot-turn driver unless one is already running.
    pub(crate) fn maybe_drive_bot(&mut self, game_id: &GameId, ctx: &mut ActorContext<Self>) {
        let has_bot = self
            .sessions
            .get(game_id)
            .is_some_and(|session| session.is_live() && session.bot_seat().is_some());
        if !has_bot || !self.bot_driving.insert(game_id.clone()) {
            return;
        }
        let addr = ctx.address();
        tokio::spawn(drive_bot_game(addr, game_id.clone()));
    }
}

pub(crate) async fn submit_and_await(
    addr: &Addr<ServerActor>,
    bgs_id: BgsId,
    kind: SubmitKind,
) -> Result<BgsResponse, BgsError> {
    let submitted = addr
        .send(SubmitBgsRequest { bgs_id, kind })
        .await
        .map_err(|_| BgsError::SessionEnded)?;
    match submitted {
        Ok(rx) => rx.await.unwrap_or(Err(BgsError::SessionEnded)),
        Err(SubmitError::Busy) => Err(BgsError::Refused("request already in flight".to_owned())),
        Err(SubmitError::UnknownSession) => Err(BgsError::SessionEnded),
        Err(SubmitError::BotGone) => Err(BgsError::ClientDisconnected),
    }
}

/// Plays the bot's turns until the game waits on a human again.
async fn drive_bot_game(addr: Addr<ServerActor>, game_id: GameId) {
    let mut stuck = false;
    loop {
        let plan = match addr
            .send(PlanBotStep {
                game_id: game_id.clone(),
            })
            .await
        {
            Ok(plan) => plan,
            Err(_) => break,
        };
        let Some(step) = plan else { break };
        match step {
            BotStep::Apply { bgs_id, ply, mv } => {
                if let Err(err) = submit_and_await(
                    &addr,
                    bgs_id,
                    SubmitKind::ApplyMove {
                        expected_ply: ply,
                        mv,
                    },
                )
                .await
                {
                    warn!("catch-up of {game_id} stopped: {err}");
                    stuck = true;
                    break;
                }
            }
            BotStep::Evaluate { bgs_id, ply } => {
                match submit_and_await(
                    &addr,
                    bgs_id.clone(),
                    SubmitKind::Evaluate { expected_ply: ply },
                )
                .await
                {
                    Ok(BgsResponse::Evaluated(entry)) => {
                        addr.do_send(EvalStepDone {
                            bgs_id,
                            entry: entry.clone(),
                        });
                        let played = addr
                            .send(PlayBotMove {
                                game_id: game_id.clone(),
                                notation: entry.best_move,
                            })
                            .await
                            .unwrap_or(false);
                        if !played {
                            stuck = true;
                            break;
                        }
                    }
                    Ok(other) => {
                        debug!("unexpected response while evaluating {game_id}: {other:?}");
                        stuck = true;
                        break;
                    }
                    Err(err) => {
                        warn!("evaluation of {game_id} failed: {err}");
                        stuck = true;
                        break;
                    }
                }
            }
            BotStep::Play { notation } => {
                let played = addr
                    .send(PlayBotMove {
                        game_id: game_id.clone(),
                        notation,
                    })
                    .await
                    .unwrap_or(false);
                if !played {
                    stuck = true;
                    break;
                }
            }
        }
    }
    addr.do_send(BotDriveFinished { game_id, stuck });
}

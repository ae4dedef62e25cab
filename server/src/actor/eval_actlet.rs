// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The eval-bar surface. One shared bot game session serves every
//! subscriber of a live human-vs-human game; live bot games reuse the
//! bot's own session; finished games get a throwaway replay session
//! per viewer.

use super::bot_actlet::{submit_and_await, SubmitKind};
use super::server_actor::ServerActor;
use crate::observer::{ConnectionId, Observer};
use crate::service::{BgsResponse, EvalSubscriber, Topics, MAX_BGS_SESSIONS};
use actix::{Addr, AsyncContext, Context as ActorContext, Handler, Message};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::Duration;
use wallgame_common::protocol::{BgsConfig, EvalEntry, EvalRejectCode, EvalServerMessage};
use wallgame_common::{AccessToken, BgsId, GameId, SessionStatus};

/// Fixed backoff while waiting for a bot game's own session to finish
/// initializing.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_ATTEMPTS: u32 = 20;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum SharedEvalStatus {
    Initializing,
    Ready,
    Error,
}

/// The one eval session of a live human-vs-human game. Its lifetime is
/// tied to the game, never to its viewers.
pub(crate) struct SharedEval {
    pub bgs_id: BgsId,
    pub status: SharedEvalStatus,
}

#[derive(Default)]
pub struct EvalRepo {
    shared: HashMap<GameId, SharedEval>,
}

impl EvalRepo {
    pub(crate) fn get(&self, game_id: &GameId) -> Option<&SharedEval> {
        self.shared.get(game_id)
    }

    pub(crate) fn get_mut(&mut self, game_id: &GameId) -> Option<&mut SharedEval> {
        self.shared.get_mut(game_id)
    }

    pub(crate) fn insert_initializing(&mut self, game_id: GameId, bgs_id: BgsId) {
        self.shared.insert(
            game_id,
            SharedEval {
                bgs_id,
                status: SharedEvalStatus::Initializing,
            },
        );
    }

    /// The game ended; the shared session goes with it.
    pub fn forget_game(&mut self, game_id: &GameId) {
        self.shared.remove(game_id);
    }

    /// The session's bot died under us. Forget the machinery and tell
    /// the viewers, so a later subscriber can start over.
    pub fn on_bgs_died(&mut self, game_id: &GameId, bgs_id: &BgsId, topics: &mut Topics) {
        let matches = self
            .shared
            .get(game_id)
            .is_some_and(|shared| &shared.bgs_id == bgs_id);
        if matches {
            self.shared.remove(game_id);
            topics.broadcast_eval(
                game_id,
                &EvalServerMessage::Error {
                    code: EvalRejectCode::InternalError,
                    message: "evaluation provider disconnected".to_owned(),
                },
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct EvalRejection {
    pub code: EvalRejectCode,
    pub message: String,
}

impl EvalRejection {
    fn new(code: EvalRejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A completed `eval-handshake`.
#[derive(Message)]
#[rtype(result = "Result<(), EvalRejection>")]
pub struct EvalSubscribe {
    pub conn_id: ConnectionId,
    pub observer: Observer<EvalServerMessage>,
    pub game_id: GameId,
    /// Lets a player prove they are a player; rated players may not
    /// watch the bar of their own live game.
    pub viewer_token: Option<AccessToken>,
}

impl Handler<EvalSubscribe> for ServerActor {
    type Result = Result<(), EvalRejection>;

    fn handle(&mut self, subscribe: EvalSubscribe, ctx: &mut ActorContext<Self>) -> Self::Result {
        let Some(session) = self.sessions.get(&subscribe.game_id) else {
            return Err(EvalRejection::new(
                EvalRejectCode::GameNotFound,
                "no such game",
            ));
        };
        if session.cancelled {
            return Err(EvalRejection::new(
                EvalRejectCode::GameNotFound,
                "game was cancelled",
            ));
        }
        let live = session.status != SessionStatus::Completed;
        if session.rated && live {
            if let Some(token) = subscribe.viewer_token.as_ref() {
                let is_player = session.seat_with_token(token).is_some()
                    || session.seat_with_socket_token(token).is_some();
                if is_player {
                    return Err(EvalRejection::new(
                        EvalRejectCode::RatedPlayer,
                        "players may not watch the bar of their own rated game",
                    ));
                }
            }
        }

        let game_id = subscribe.game_id;
        let total_moves = session.game.move_count() as u32;
        let has_bot = session.bot_seat().is_some();
        let variant = session.variant;
        let (board_width, board_height) = (session.board.width, session.board.height);

        if !live {
            // Replay: a throwaway session per viewer.
            let Some(composite_id) = self.registry.find_eval_bot(variant, board_width, board_height)
            else {
                return Err(EvalRejection::new(
                    EvalRejectCode::NoBot,
                    "no official bot can evaluate this board",
                ));
            };
            if self.bgs.len() >= MAX_BGS_SESSIONS {
                return Err(EvalRejection::new(
                    EvalRejectCode::InternalError,
                    "evaluation capacity reached",
                ));
            }
            let bgs_id = BgsId::for_replay(&game_id);
            let config = BgsConfig {
                variant,
                board_width,
                board_height,
            };
            self.bgs
                .create(bgs_id.clone(), composite_id.clone(), game_id.clone(), config);
            if let Some(client) = self.registry.get_mut(&composite_id.client_id()) {
                client.active_bgs.insert(bgs_id.clone());
            }
            self.topics.subscribe_eval(
                game_id.clone(),
                EvalSubscriber {
                    conn_id: subscribe.conn_id,
                    observer: subscribe.observer.clone(),
                },
            );
            self.topics.send_to_eval_conn(
                &game_id,
                subscribe.conn_id,
                EvalServerMessage::Pending { total_moves },
            );
            tokio::spawn(drive_eval(
                ctx.address(),
                bgs_id,
                game_id,
                Some(subscribe.conn_id),
            ));
            return Ok(());
        }

        if has_bot {
            // Live bot game: its own session is the eval source.
            let bgs_id = BgsId::for_game(&game_id);
            let Some(bgs) = self.bgs.get(&bgs_id) else {
                return Err(EvalRejection::new(
                    EvalRejectCode::InternalError,
                    "bot session not available",
                ));
            };
            let history = bgs.history.clone();
            let ready = bgs.status == crate::service::BgsStatus::Ready && !history.is_empty();
            self.topics.subscribe_eval(
                game_id.clone(),
                EvalSubscriber {
                    conn_id: subscribe.conn_id,
                    observer: subscribe.observer,
                },
            );
            if ready {
                self.topics.send_to_eval_conn(
                    &game_id,
                    subscribe.conn_id,
                    EvalServerMessage::History { entries: history },
                );
            } else {
                self.topics.send_to_eval_conn(
                    &game_id,
                    subscribe.conn_id,
                    EvalServerMessage::Pending { total_moves },
                );
                ctx.notify(PollBotGameEval {
                    game_id,
                    conn_id: subscribe.conn_id,
                    attempts_left: POLL_ATTEMPTS,
                });
            }
            return Ok(());
        }

        // Live human-vs-human: at most one shared session per game.
        match self.evals.get(&game_id).map(|shared| shared.status) {
            Some(SharedEvalStatus::Error) => {
                return Err(EvalRejection::new(
                    EvalRejectCode::InternalError,
                    "evaluation is unavailable for this game",
                ));
            }
            Some(SharedEvalStatus::Ready) => {
                let bgs_id = BgsId::for_game(&game_id);
                let history = self
                    .bgs
                    .get(&bgs_id)
                    .map(|bgs| bgs.history.clone())
                    .unwrap_or_default();
                self.topics.subscribe_eval(
                    game_id.clone(),
                    EvalSubscriber {
                        conn_id: subscribe.conn_id,
                        observer: subscribe.observer,
                    },
                );
                self.topics.send_to_eval_conn(
                    &game_id,
                    subscribe.conn_id,
                    EvalServerMessage::History { entries: history },
                );
            }
            Some(SharedEvalStatus::Initializing) => {
                self.topics.subscribe_eval(
                    game_id.clone(),
                    EvalSubscriber {
                        conn_id: subscribe.conn_id,
                        observer: subscribe.observer,
                    },
                );
                self.topics.send_to_eval_conn(
                    &game_id,
                    subscribe.conn_id,
                    EvalServerMessage::Pending { total_moves },
                );
            }
            None => {
                let Some(composite_id) =
                    self.registry.find_eval_bot(variant, board_width, board_height)
                else {
                    return Err(EvalRejection::new(
                        EvalRejectCode::NoBot,
                        "no official bot can evaluate this board",
                    ));
                };
                if self.bgs.len() >= MAX_BGS_SESSIONS {
                    return Err(EvalRejection::new(
                        EvalRejectCode::InternalError,
                        "evaluation capacity reached",
                    ));
                }
                let bgs_id = BgsId::for_game(&game_id);
                let config = BgsConfig {
                    variant,
                    board_width,
                    board_height,
                };
                if self
                    .bgs
                    .create(bgs_id.clone(), composite_id.clone(), game_id.clone(), config)
                    .is_none()
                {
                    return Err(EvalRejection::new(
                        EvalRejectCode::InternalError,
                        "evaluation session could not be created",
                    ));
                }
                if let Some(client) = self.registry.get_mut(&composite_id.client_id()) {
                    client.active_bgs.insert(bgs_id.clone());
                }
                self.evals
                    .insert_initializing(game_id.clone(), bgs_id.clone());
                self.topics.subscribe_eval(
                    game_id.clone(),
                    EvalSubscriber {
                        conn_id: subscribe.conn_id,
                        observer: subscribe.observer,
                    },
                );
                self.topics.send_to_eval_conn(
                    &game_id,
                    subscribe.conn_id,
                    EvalServerMessage::Pending { total_moves },
                );
                tokio::spawn(drive_eval(ctx.address(), bgs_id, game_id, None));
            }
        }
        Ok(())
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct EvalUnsubscribe {
    pub game_id: GameId,
    pub conn_id: ConnectionId,
}

impl Handler<EvalUnsubscribe> for ServerActor {
    type Result = ();

    fn handle(&mut self, unsubscribe: EvalUnsubscribe, _ctx: &mut ActorContext<Self>) {
        // Fewer viewers never tears the shared session down.
        self.topics
            .unsubscribe_eval(&unsubscribe.game_id, unsubscribe.conn_id);
    }
}

/// Backoff poll against a bot game's own session becoming ready.
#[derive(Message)]
#[rtype(result = "()")]
struct PollBotGameEval {
    game_id: GameId,
    conn_id: ConnectionId,
    attempts_left: u32,
}

impl Handler<PollBotGameEval> for ServerActor {
    type Result = ();

    fn handle(&mut self, poll: PollBotGameEval, ctx: &mut ActorContext<Self>) {
        let bgs_id = BgsId::for_game(&poll.game_id);
        let ready_history = self
            .bgs
            .get(&bgs_id)
            .filter(|bgs| bgs.status == crate::service::BgsStatus::Ready && !bgs.history.is_empty())
            .map(|bgs| bgs.history.clone());
        match ready_history {
            Some(entries) => {
                self.topics.send_to_eval_conn(
                    &poll.game_id,
                    poll.conn_id,
                    EvalServerMessage::History { entries },
                );
            }
            None if poll.attempts_left > 0 => {
                ctx.run_later(POLL_INTERVAL, move |_act, ctx| {
                    ctx.notify(PollBotGameEval {
                        game_id: poll.game_id,
                        conn_id: poll.conn_id,
                        attempts_left: poll.attempts_left - 1,
                    });
                });
            }
            None => {
                self.topics.send_to_eval_conn(
                    &poll.game_id,
                    poll.conn_id,
                    EvalServerMessage::Error {
                        code: EvalRejectCode::InternalError,
                        message: "evaluation did not become ready".to_owned(),
                    },
                );
            }
        }
    }
}

/// What the eval driver should do next. Unlike the bot-turn driver,
/// this one scores every ply, so histories stay dense.
#[derive(Clone, Debug)]
enum EvalStep {
    Start,
    Apply { ply: u32, mv: String },
    Evaluate { ply: u32 },
}

#[derive(Message)]
#[rtype(result = "Option<EvalStep>")]
struct PlanEvalStep {
    bgs_id: BgsId,
}

impl Handler<PlanEvalStep> for ServerActor {
    type Result = Option<EvalStep>;

    fn handle(&mut self, plan: PlanEvalStep, _ctx: &mut ActorContext<Self>) -> Self::Result {
        let bgs = self.bgs.get(&plan.bgs_id)?;
        if bgs.pending.is_some() {
            return None;
        }
        if bgs.status == crate::service::BgsStatus::Initializing {
            return Some(EvalStep::Start);
        }
        let session = self.sessions.get(&bgs.game_id)?;
        let ply = bgs.current_ply;
        if bgs.evaluation_at_current_ply().is_none() {
            return Some(EvalStep::Evaluate { ply });
        }
        if (ply as usize) < session.game.move_count() {
            let mv = session.game.moves[ply as usize].notation.to_string();
            return Some(EvalStep::Apply { ply, mv });
        }
        None
    }
}

/// A fresh evaluation landed in a live session's history.
#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct EvalStepDone {
    pub bgs_id: BgsId,
    pub entry: EvalEntry,
}

impl Handler<EvalStepDone> for ServerActor {
    type Result = ();

    fn handle(&mut self, done: EvalStepDone, _ctx: &mut ActorContext<Self>) {
        let Some(bgs) = self.bgs.get(&done.bgs_id) else {
            return;
        };
        let game_id = bgs.game_id.clone();
        if done.bgs_id != BgsId::for_game(&game_id) {
            // Replay sessions deliver one final history instead.
            return;
        }
        // During shared initialization viewers are still waiting for
        // their first `eval-history`; updates would arrive out of order.
        if self
            .evals
            .get(&game_id)
            .is_some_and(|shared| shared.status != SharedEvalStatus::Ready)
        {
            return;
        }
        self.topics.broadcast_eval(
            &game_id,
            &EvalServerMessage::Update {
                ply: done.entry.ply,
                evaluation: done.entry.evaluation,
                best_move: done.entry.best_move,
            },
        );
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct EvalDriveFinished {
    bgs_id: BgsId,
    game_id: GameId,
    /// `Some` for per-viewer replays.
    conn_id: Option<ConnectionId>,
    ok: bool,
}

impl Handler<EvalDriveFinished> for ServerActor {
    type Result = ();

    fn handle(&mut self, finished: EvalDriveFinished, ctx: &mut ActorContext<Self>) {
        self.eval_driving.remove(&finished.game_id);

        if let Some(conn_id) = finished.conn_id {
            // Replay: deliver and throw the session away.
            if finished.ok {
                let entries = self
                    .bgs
                    .get(&finished.bgs_id)
                    .map(|bgs| bgs.history.clone())
                    .unwrap_or_default();
                self.topics.send_to_eval_conn(
                    &finished.game_id,
                    conn_id,
                    EvalServerMessage::History { entries },
                );
            } else {
                self.topics.send_to_eval_conn(
                    &finished.game_id,
                    conn_id,
                    EvalServerMessage::Error {
                        code: EvalRejectCode::InternalError,
                        message: "replay evaluation failed".to_owned(),
                    },
                );
            }
            self.end_bgs(&finished.bgs_id);
            return;
        }

        let Some(shared) = self.evals.get_mut(&finished.game_id) else {
            return;
        };
        match (shared.status, finished.ok) {
            (SharedEvalStatus::Initializing, true) => {
                shared.status = SharedEvalStatus::Ready;
                let entries = self
                    .bgs
                    .get(&finished.bgs_id)
                    .map(|bgs| bgs.history.clone())
                    .unwrap_or_default();
                debug!(
                    "shared eval of {} ready with {} entries",
                    finished.game_id,
                    entries.len()
                );
                self.topics.broadcast_eval(
                    &finished.game_id,
                    &EvalServerMessage::History { entries },
                );
                // Moves may have landed while the replay caught up.
                self.maybe_drive_eval(&finished.game_id, ctx);
            }
            (_, false) => {
                warn!("shared eval of {} failed", finished.game_id);
                shared.status = SharedEvalStatus::Error;
                self.topics.broadcast_eval(
                    &finished.game_id,
                    &EvalServerMessage::Error {
                        code: EvalRejectCode::InternalError,
                        message: "evaluation failed".to_owned(),
                    },
                );
                self.end_bgs(&finished.bgs_id);
            }
            (_, true) => {
                // A streaming catch-up run drained; check for stragglers.
                self.maybe_drive_eval(&finished.game_id, ctx);
            }
        }
    }
}

impl ServerActor {
    /// Advances the shared eval session after a move, unless a driver
    /// is already on it.
    pub(crate) fn maybe_drive_eval(&mut self, game_id: &GameId, ctx: &mut ActorContext<Self>) {
        let Some(shared) = self.evals.get(game_id) else {
            return;
        };
        if shared.status != SharedEvalStatus::Ready {
            return;
        }
        let bgs_id = shared.bgs_id.clone();
        let behind = self.bgs.get(&bgs_id).is_some_and(|bgs| {
            bgs.pending.is_none()
                && (bgs.evaluation_at_current_ply().is_none()
                    || self
                        .sessions
                        .get(game_id)
                        .is_some_and(|s| (bgs.current_ply as usize) < s.game.move_count()))
        });
        if !behind || !self.eval_driving.insert(game_id.clone()) {
            return;
        }
        tokio::spawn(drive_eval(ctx.address(), bgs_id, game_id.clone(), None));
    }
}

/// Runs a session forward: start it if needed, then alternate
/// apply/evaluate until the history covers the game.
async fn drive_eval(
    addr: Addr<ServerActor>,
    bgs_id: BgsId,
    game_id: GameId,
    conn_id: Option<ConnectionId>,
) {
    let mut ok = true;
    loop {
        let plan = match addr
            .send(PlanEvalStep {
                bgs_id: bgs_id.clone(),
            })
            .await
        {
            Ok(plan) => plan,
            Err(_) => return,
        };
        let Some(step) = plan else { break };
        let result = match step {
            EvalStep::Start => submit_and_await(&addr, bgs_id.clone(), SubmitKind::Start).await,
            EvalStep::Apply { ply, mv } => {
                submit_and_await(
                    &addr,
                    bgs_id.clone(),
                    SubmitKind::ApplyMove {
                        expected_ply: ply,
                        mv,
                    },
                )
                .await
            }
            EvalStep::Evaluate { ply } => {
                submit_and_await(
                    &addr,
                    bgs_id.clone(),
                    SubmitKind::Evaluate { expected_ply: ply },
                )
                .await
            }
        };
        match result {
            Ok(BgsResponse::Evaluated(entry)) => {
                addr.do_send(EvalStepDone {
                    bgs_id: bgs_id.clone(),
                    entry,
                });
            }
            Ok(_) => {}
            Err(err) => {
                warn!("evaluation of {game_id} aborted: {err}");
                ok = false;
                break;
            }
        }
    }
    addr.do_send(EvalDriveFinished {
        bgs_id,
        game_id,
        conn_id,
        ok,
    });
}

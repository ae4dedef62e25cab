// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::EvalRepo;
use crate::observer::observe;
use crate::service::{
    elo_delta, BgsRepo, BotRegistry, FinishedGameRecord, PersistHandle, PersistJob, Persister,
    RatingUpdateRecord, SessionRepo, Topics, DEFAULT_RATING,
};
use actix::{Actor, AsyncContext, Context as ActorContext};
use log::{debug, info};
use std::collections::HashSet;
use std::time::Duration;
use wallgame_common::protocol::{BotServerMessage, ClientInfo, GameServerMessage};
use wallgame_common::{GameId, LiveGamesUpdate, LobbyUpdate, MatchStatusDto, SessionStatus};

/// Knobs the fabric is constructed with.
pub struct CoreConfig {
    pub official_secret: Option<String>,
    pub max_bot_clients: usize,
    pub server_info: ClientInfo,
}

impl CoreConfig {
    pub fn server_info() -> ClientInfo {
        ClientInfo {
            name: "wallgame-server".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// The entire coordination fabric. One actor serializes every mutation
/// of the stores; socket tasks and long-running bot conversations live
/// outside and talk to it through messages.
pub struct ServerActor {
    pub(crate) config: CoreConfig,
    pub(crate) sessions: SessionRepo,
    pub(crate) registry: BotRegistry,
    pub(crate) bgs: BgsRepo,
    pub(crate) topics: Topics,
    pub(crate) evals: EvalRepo,
    pub(crate) persist: PersistHandle,
    /// Games whose bot turn a task is currently driving.
    pub(crate) bot_driving: HashSet<GameId>,
    /// Games whose shared eval a task is currently advancing.
    pub(crate) eval_driving: HashSet<GameId>,
}

const TICK_PERIOD: Duration = Duration::from_secs(1);
const STALE_BGS_AGE: Duration = Duration::from_secs(10 * 60);
const COMPLETED_SESSION_AGE: Duration = Duration::from_secs(60 * 60);

impl Actor for ServerActor {
    type Context = ActorContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("server actor started");
        ctx.run_interval(TICK_PERIOD, Self::update);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("server actor stopped");
    }
}

impl ServerActor {
    pub fn new(config: CoreConfig, persister: Box<dyn Persister>) -> Self {
        let max_bot_clients = config.max_bot_clients;
        Self {
            config,
            sessions: SessionRepo::default(),
            registry: BotRegistry::new(max_bot_clients),
            bgs: BgsRepo::default(),
            topics: Topics::default(),
            evals: EvalRepo::default(),
            persist: PersistHandle::spawn(persister),
            bot_driving: HashSet::new(),
            eval_driving: HashSet::new(),
        }
    }

    /// Housekeeping tick: flag fallen clocks, drop idle bot game
    /// sessions, prune long-dead games.
    fn update(&mut self, ctx: &mut <Self as Actor>::Context) {
        let flagged = self.sessions.sweep_clocks(std::time::Instant::now());
        for game_id in flagged {
            self.on_game_finished(&game_id, ctx);
        }

        for bgs_id in self.bgs.stale_ids(STALE_BGS_AGE) {
            debug!("dropping stale bot game session {bgs_id}");
            self.end_bgs(&bgs_id);
        }

        let pruned = self.sessions.prune(COMPLETED_SESSION_AGE);
        if pruned > 0 {
            debug!("pruned {pruned} completed sessions");
        }
    }

    pub(crate) fn broadcast_state(&mut self, game_id: &GameId) {
        let Some(view) = self.sessions.get(game_id).map(|s| s.view()) else {
            return;
        };
        self.topics
            .broadcast_game(game_id, &GameServerMessage::State { game: view });
    }

    pub(crate) fn broadcast_lobby(&mut self) {
        let games = self.sessions.lobby_games();
        self.topics.broadcast_lobby(&LobbyUpdate::Games { games });
    }

    pub(crate) fn broadcast_live_upsert(&mut self, game_id: &GameId) {
        let Some(summary) = self.sessions.get(game_id).map(|s| s.summary()) else {
            return;
        };
        self.topics
            .broadcast_live(&LiveGamesUpdate::Upsert { game: summary });
    }

    pub(crate) fn broadcast_live_remove(&mut self, game_id: &GameId) {
        self.topics.broadcast_live(&LiveGamesUpdate::Remove {
            game_id: game_id.clone(),
        });
    }

    /// Everything that follows a move having been applied: fan-out,
    /// then either the end-of-game path or the bot/eval follow-ups.
    pub(crate) fn after_move(&mut self, game_id: &GameId, ctx: &mut <Self as Actor>::Context) {
        self.broadcast_state(game_id);
        self.broadcast_live_upsert(game_id);

        let finished = self
            .sessions
            .get(game_id)
            .map(|s| s.status == SessionStatus::Completed)
            .unwrap_or(true);
        if finished {
            self.on_game_finished(game_id, ctx);
        } else {
            self.maybe_drive_bot(game_id, ctx);
            self.maybe_drive_eval(game_id, ctx);
        }
    }

    /// Post-finish orchestration; called exactly once by whichever path
    /// finished the game.
    pub(crate) fn on_game_finished(
        &mut self,
        game_id: &GameId,
        _ctx: &mut <Self as Actor>::Context,
    ) {
        let Some(session) = self.sessions.get(game_id) else {
            return;
        };
        debug_assert_eq!(session.status, SessionStatus::Completed);

        // Ratings first, so the broadcast below carries the new Elo.
        let ratings = self.updated_ratings(game_id);
        if let Some((host_rating, joiner_rating)) = ratings {
            let mut updates = Vec::new();
            let session = self.sessions.get(game_id).unwrap();
            if let Some(auth) = session.host.auth_user_id.clone() {
                updates.push((auth, host_rating));
            }
            if let Some(auth) = session
                .joiner
                .as_ref()
                .and_then(|seat| seat.auth_user_id.clone())
            {
                updates.push((auth, joiner_rating));
            }
            if !updates.is_empty() {
                self.persist.submit(PersistJob::Ratings(RatingUpdateRecord {
                    game_id: game_id.clone(),
                    ratings: updates,
                }));
            }
        }

        let session = self.sessions.get(game_id).unwrap();
        self.persist.submit(PersistJob::FinishedGame(Box::new(
            FinishedGameRecord::of(session),
        )));

        let status = MatchStatusDto {
            score: session.match_score,
            game_number: session.rematch_number + 1,
            last_result: session.game.result,
            ratings: ratings.map(|(host, joiner)| [host, joiner]),
        };
        self.broadcast_state(game_id);
        self.topics
            .broadcast_game(game_id, &GameServerMessage::MatchStatus(status));
        self.broadcast_live_remove(game_id);

        // Tear down every bot game session attached to this game; the
        // shared eval session dies with the game, not with its viewers.
        for bgs_id in self.bgs.ids_for_game(game_id) {
            self.end_bgs(&bgs_id);
        }
        self.evals.forget_game(game_id);
        self.release_bot_seats(game_id);
    }

    /// New Elo (host, joiner) for a rated game with both seats human.
    fn updated_ratings(&self, game_id: &GameId) -> Option<(f64, f64)> {
        let session = self.sessions.get(game_id)?;
        if !session.rated || session.bot_seat().is_some() {
            return None;
        }
        let result = session.game.result?;
        let joiner = session.joiner.as_ref()?;
        let host_rating = session.host.rating_at_start.unwrap_or(DEFAULT_RATING);
        let joiner_rating = joiner.rating_at_start.unwrap_or(DEFAULT_RATING);
        let host_score = match result.winner {
            Some(winner) if winner == session.host.player => 1.0,
            Some(_) => 0.0,
            None => 0.5,
        };
        Some((
            host_rating + elo_delta(host_rating, joiner_rating, host_score),
            joiner_rating + elo_delta(joiner_rating, host_rating, 1.0 - host_score),
        ))
    }

    /// Removes a finished game from its bots' active-game maps.
    fn release_bot_seats(&mut self, game_id: &GameId) {
        let composites: Vec<_> = self
            .sessions
            .get(game_id)
            .into_iter()
            .flat_map(|session| session.seats())
            .filter_map(|seat| seat.bot.clone())
            .collect();
        for composite in composites {
            if let Some(bot) = self.registry.bot_mut(&composite) {
                bot.active_games.remove(game_id);
            }
        }
    }

    /// Ends one bot game session: rejects any in-flight resolver,
    /// forgets the record, and tells the serving client, if it is
    /// still attached. Idempotent.
    pub(crate) fn end_bgs(&mut self, bgs_id: &wallgame_common::BgsId) {
        let Some(session) = self.bgs.end(bgs_id) else {
            return;
        };
        if let Some(client) = self.registry.get_mut(&session.composite_id.client_id()) {
            client.active_bgs.remove(bgs_id);
            observe(
                &client.observer,
                BotServerMessage::EndGameSession {
                    bgs_id: bgs_id.clone(),
                },
            );
        }
    }

}

// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::Session;
use log::{info, warn};
use tokio::sync::mpsc;
use wallgame_common::game::{GameResult, MatchType, MoveRecord, TimeControl, Variant};
use wallgame_common::{GameId, SeriesId};

/// Starting Elo for players without a history.
pub const DEFAULT_RATING: f64 = 1500.0;

const ELO_K: f64 = 32.0;
const QUEUE_DEPTH: usize = 256;

/// Everything the persistence layer needs about a finished game.
#[derive(Clone, Debug)]
pub struct FinishedGameRecord {
    pub game_id: GameId,
    pub series_id: SeriesId,
    pub rematch_number: u32,
    pub variant: Variant,
    pub board_width: u8,
    pub board_height: u8,
    pub time_control: TimeControl,
    pub rated: bool,
    pub match_type: MatchType,
    pub host_name: String,
    pub joiner_name: Option<String>,
    pub moves: Vec<MoveRecord>,
    pub result: Option<GameResult>,
}

impl FinishedGameRecord {
    pub fn of(session: &Session) -> Self {
        Self {
            game_id: session.id.clone(),
            series_id: session.series_id.clone(),
            rematch_number: session.rematch_number,
            variant: session.variant,
            board_width: session.board.width,
            board_height: session.board.height,
            time_control: session.time_control,
            rated: session.rated,
            match_type: session.match_type,
            host_name: session.host.display_name.clone(),
            joiner_name: session.joiner.as_ref().map(|seat| seat.display_name.clone()),
            moves: session.game.moves.clone(),
            result: session.game.result,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RatingUpdateRecord {
    pub game_id: GameId,
    /// (user id, new rating) per rated seat.
    pub ratings: Vec<(String, f64)>,
}

#[derive(Debug)]
pub enum PersistJob {
    FinishedGame(Box<FinishedGameRecord>),
    Ratings(RatingUpdateRecord),
}

/// Where finished games and rating updates go. The fabric never waits
/// on these calls.
pub trait Persister: Send + 'static {
    fn persist_finished_game(&mut self, record: FinishedGameRecord);
    fn update_ratings(&mut self, record: RatingUpdateRecord);
}

/// Stand-in persister that only logs. The real database adapter lives
/// outside the fabric.
pub struct LogPersister;

impl Persister for LogPersister {
    fn persist_finished_game(&mut self, record: FinishedGameRecord) {
        info!(
            "would persist game {} ({} moves, result {:?})",
            record.game_id,
            record.moves.len(),
            record.result
        );
    }

    fn update_ratings(&mut self, record: RatingUpdateRecord) {
        info!("would update ratings for {}: {:?}", record.game_id, record.ratings);
    }
}

/// Bounded fire-and-forget queue in front of a [`Persister`], consumed
/// by one worker task. A full queue drops the job with a warning; it
/// never backs up into the game loop.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<PersistJob>,
}

impl PersistHandle {
    pub fn spawn(mut persister: Box<dyn Persister>) -> Self {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    PersistJob::FinishedGame(record) => persister.persist_finished_game(*record),
                    PersistJob::Ratings(record) => persister.update_ratings(record),
                }
            }
        });
        Self { tx }
    }

    pub fn submit(&self, job: PersistJob) {
        if self.tx.try_send(job).is_err() {
            warn!("persistence queue full, dropping job");
        }
    }
}

/// Rating change for `rating` having scored `score` (1 win, 0.5 draw,
/// 0 loss) against `opponent`.
pub fn elo_delta(rating: f64, opponent: f64, score: f64) -> f64 {
    let expected = 1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0));
    ELO_K * (score - expected)
}

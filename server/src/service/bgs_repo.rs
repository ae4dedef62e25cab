// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use wallgame_common::protocol::{BgsConfig, EvalEntry};
use wallgame_common::{BgsId, BotId, CompositeId, GameId};

/// Hard cap on simultaneously live bot game sessions.
pub const MAX_BGS_SESSIONS: usize = 256;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BgsStatus {
    /// `start_game_session` is in flight.
    Initializing,
    Ready,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BgsRequestKind {
    Start,
    Evaluate,
    ApplyMove,
}

/// Successful outcome of one correlated request.
#[derive(Clone, Debug, PartialEq)]
pub enum BgsResponse {
    Started,
    Evaluated(EvalEntry),
    MoveApplied { ply: u32 },
}

/// Failure of one correlated request, or of the whole session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BgsError {
    Timeout,
    SessionEnded,
    ClientDisconnected,
    Refused(String),
}

impl Display for BgsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("request timed out"),
            Self::SessionEnded => f.write_str("Session ended"),
            Self::ClientDisconnected => f.write_str("Bot client disconnected"),
            Self::Refused(reason) => write!(f, "bot refused: {reason}"),
        }
    }
}

impl std::error::Error for BgsError {}

/// The single in-flight request of a session. Holding the resolver in
/// the slot keeps "reject the resolver" and "free the slot" atomic.
pub struct PendingRequest {
    pub kind: BgsRequestKind,
    pub expected_ply: u32,
    pub created_at: Instant,
    /// Guards the timeout callback against resolving a later request.
    pub seq: u64,
    pub resolver: oneshot::Sender<Result<BgsResponse, BgsError>>,
}

/// A stateful per-(bot, game) sub-session used for stepwise evaluation
/// and move application.
pub struct BotGameSession {
    pub bgs_id: BgsId,
    pub composite_id: CompositeId,
    /// Which of the client's bots serves this session, recorded at
    /// creation so inbound responses route without guessing.
    pub bot_id: BotId,
    pub game_id: GameId,
    pub config: BgsConfig,
    pub status: BgsStatus,
    /// Append-only. Plies are usually dense for eval replays and sparse
    /// for bot games, which only evaluate when the bot is to move.
    pub history: Vec<EvalEntry>,
    pub current_ply: u32,
    pub pending: Option<PendingRequest>,
    pub created_at: Instant,
    pub updated_at: Instant,
}

impl BotGameSession {
    /// Last evaluation, if it scored the current position.
    pub fn evaluation_at_current_ply(&self) -> Option<&EvalEntry> {
        self.history.last().filter(|e| e.ply == self.current_ply)
    }
}

/// Owns every live [`BotGameSession`], keyed by id.
#[derive(Default)]
pub struct BgsRepo {
    sessions: HashMap<BgsId, BotGameSession>,
    next_seq: u64,
}

impl BgsRepo {
    /// Returns `None` on a duplicate id or at capacity.
    pub fn create(
        &mut self,
        bgs_id: BgsId,
        composite_id: CompositeId,
        game_id: GameId,
        config: BgsConfig,
    ) -> Option<&mut BotGameSession> {
        if self.sessions.len() >= MAX_BGS_SESSIONS {
            warn!("bot game session capacity reached");
            return None;
        }
        if self.sessions.contains_key(&bgs_id) {
            return None;
        }
        let now = Instant::now();
        let bot_id = composite_id.bot_id();
        let session = BotGameSession {
            bgs_id: bgs_id.clone(),
            composite_id,
            bot_id,
            game_id,
            config,
            status: BgsStatus::Initializing,
            history: Vec::new(),
            current_ply: 0,
            pending: None,
            created_at: now,
            updated_at: now,
        };
        Some(self.sessions.entry(bgs_id).or_insert(session))
    }

    pub fn get(&self, bgs_id: &BgsId) -> Option<&BotGameSession> {
        self.sessions.get(bgs_id)
    }

    pub fn get_mut(&mut self, bgs_id: &BgsId) -> Option<&mut BotGameSession> {
        self.sessions.get_mut(bgs_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Only valid while initializing.
    pub fn mark_ready(&mut self, bgs_id: &BgsId) -> bool {
        match self.sessions.get_mut(bgs_id) {
            Some(session) if session.status == BgsStatus::Initializing => {
                session.status = BgsStatus::Ready;
                session.updated_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Appends even when the ply does not line up; the mismatch is the
    /// bot's bug to fix, not a reason to lose an evaluation.
    pub fn append_history(&mut self, bgs_id: &BgsId, entry: EvalEntry) {
        let Some(session) = self.sessions.get_mut(bgs_id) else {
            return;
        };
        if entry.ply as usize != session.history.len() {
            warn!(
                "{bgs_id}: history entry ply {} does not match position {}",
                entry.ply,
                session.history.len()
            );
        }
        session.history.push(entry);
        session.updated_at = Instant::now();
    }

    /// Monotonic cursor; a decrease is ignored with a warning.
    pub fn update_current_ply(&mut self, bgs_id: &BgsId, ply: u32) {
        let Some(session) = self.sessions.get_mut(bgs_id) else {
            return;
        };
        if ply < session.current_ply {
            warn!(
                "{bgs_id}: refusing to move ply cursor backwards ({} -> {ply})",
                session.current_ply
            );
            return;
        }
        session.current_ply = ply;
        session.updated_at = Instant::now();
    }

    /// Claims the single request slot. Returns `None` if occupied.
    pub fn set_pending(
        &mut self,
        bgs_id: &BgsId,
        kind: BgsRequestKind,
        expected_ply: u32,
        resolver: oneshot::Sender<Result<BgsResponse, BgsError>>,
    ) -> Option<u64> {
        let session = self.sessions.get_mut(bgs_id)?;
        if session.pending.is_some() {
            return None;
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        session.pending = Some(PendingRequest {
            kind,
            expected_ply,
            created_at: Instant::now(),
            seq,
            resolver,
        });
        Some(seq)
    }

    pub fn take_pending(&mut self, bgs_id: &BgsId) -> Option<PendingRequest> {
        self.sessions.get_mut(bgs_id)?.pending.take()
    }

    /// Takes the pending request only if it is still the one that the
    /// caller armed a timer for.
    pub fn take_pending_if_seq(&mut self, bgs_id: &BgsId, seq: u64) -> Option<PendingRequest> {
        let session = self.sessions.get_mut(bgs_id)?;
        if session.pending.as_ref().map(|p| p.seq) == Some(seq) {
            session.pending.take()
        } else {
            None
        }
    }

    /// Terminal: rejects any in-flight resolver and forgets the
    /// session. Idempotent.
    pub fn end(&mut self, bgs_id: &BgsId) -> Option<BotGameSession> {
        let mut session = self.sessions.remove(bgs_id)?;
        if let Some(pending) = session.pending.take() {
            let _ = pending.resolver.send(Err(BgsError::SessionEnded));
        }
        debug!("ended bot game session {bgs_id}");
        Some(session)
    }

    /// Ends every session served by `composite_id`, rejecting in-flight
    /// resolvers with `error`.
    pub fn end_all_for_bot(&mut self, composite_id: &CompositeId, error: BgsError) -> Vec<BotGameSession> {
        let ids: Vec<BgsId> = self
            .sessions
            .values()
            .filter(|s| &s.composite_id == composite_id)
            .map(|s| s.bgs_id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| {
                let mut session = self.sessions.remove(&id)?;
                if let Some(pending) = session.pending.take() {
                    let _ = pending.resolver.send(Err(error.clone()));
                }
                Some(session)
            })
            .collect()
    }

    /// Every session attached to a game; used when the game ends.
    pub fn ids_for_game(&self, game_id: &GameId) -> Vec<BgsId> {
        self.sessions
            .values()
            .filter(|s| &s.game_id == game_id)
            .map(|s| s.bgs_id.clone())
            .collect()
    }

    /// Sessions idle longer than `max_age`; the caller ends them.
    pub fn stale_ids(&self, max_age: Duration) -> Vec<BgsId> {
        let now = Instant::now();
        self.sessions
            .values()
            .filter(|s| now.duration_since(s.updated_at) > max_age && s.pending.is_none())
            .map(|s| s.bgs_id.clone())
            .collect()
    }
}

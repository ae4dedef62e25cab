// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::observer::{observe, observe_close, ConnectionId, Observer};
use log::debug;
use std::collections::HashMap;
use wallgame_common::protocol::{EvalServerMessage, GameServerMessage, CLOSE_NORMAL};
use wallgame_common::{GameId, LiveGamesUpdate, LobbyUpdate, PlayerNumber};

/// One follower of a `game:<id>` topic.
pub struct GameSubscriber {
    pub conn_id: ConnectionId,
    /// `None` for spectators.
    pub seat: Option<PlayerNumber>,
    pub observer: Observer<GameServerMessage>,
}

pub struct EvalSubscriber {
    pub conn_id: ConnectionId,
    pub observer: Observer<EvalServerMessage>,
}

/// Pure fan-out over the four topic families. Delivery is best-effort:
/// a failed send drops the subscriber and is otherwise ignored.
#[derive(Default)]
pub struct Topics {
    game: HashMap<GameId, Vec<GameSubscriber>>,
    lobby: Vec<(ConnectionId, Observer<LobbyUpdate>)>,
    live: Vec<(ConnectionId, Observer<LiveGamesUpdate>)>,
    eval: HashMap<GameId, Vec<EvalSubscriber>>,
}

impl Topics {
    pub fn subscribe_game(&mut self, game_id: GameId, subscriber: GameSubscriber) {
        self.game.entry(game_id).or_default().push(subscriber);
    }

    pub fn unsubscribe_game(&mut self, game_id: &GameId, conn_id: ConnectionId) {
        if let Some(subscribers) = self.game.get_mut(game_id) {
            subscribers.retain(|s| s.conn_id != conn_id);
            if subscribers.is_empty() {
                self.game.remove(game_id);
            }
        }
    }

    pub fn broadcast_game(&mut self, game_id: &GameId, message: &GameServerMessage) {
        if let Some(subscribers) = self.game.get_mut(game_id) {
            subscribers.retain(|s| {
                let delivered = observe(&s.observer, message.clone());
                if !delivered {
                    debug!("dropping dead game subscriber of {game_id}");
                }
                delivered
            });
        }
    }

    /// Private offers: skip the sender's seat and every spectator.
    pub fn send_opponent_only(
        &mut self,
        game_id: &GameId,
        from: PlayerNumber,
        message: &GameServerMessage,
    ) {
        let to = from.opponent();
        if let Some(subscribers) = self.game.get_mut(game_id) {
            for subscriber in subscribers.iter() {
                if subscriber.seat == Some(to) {
                    observe(&subscriber.observer, message.clone());
                }
            }
        }
    }

    pub fn send_to_seat(&mut self, game_id: &GameId, seat: PlayerNumber, message: &GameServerMessage) {
        if let Some(subscribers) = self.game.get_mut(game_id) {
            for subscriber in subscribers.iter() {
                if subscriber.seat == Some(seat) {
                    observe(&subscriber.observer, message.clone());
                }
            }
        }
    }

    pub fn send_to_game_conn(
        &mut self,
        game_id: &GameId,
        conn_id: ConnectionId,
        message: GameServerMessage,
    ) {
        if let Some(subscriber) = self
            .game
            .get(game_id)
            .and_then(|subscribers| subscribers.iter().find(|s| s.conn_id == conn_id))
        {
            observe(&subscriber.observer, message);
        }
    }

    pub fn subscribe_lobby(&mut self, conn_id: ConnectionId, observer: Observer<LobbyUpdate>) {
        self.lobby.push((conn_id, observer));
    }

    pub fn unsubscribe_lobby(&mut self, conn_id: ConnectionId) {
        self.lobby.retain(|(id, _)| *id != conn_id);
    }

    pub fn broadcast_lobby(&mut self, message: &LobbyUpdate) {
        self.lobby
            .retain(|(_, observer)| observe(observer, message.clone()));
    }

    pub fn subscribe_live(&mut self, conn_id: ConnectionId, observer: Observer<LiveGamesUpdate>) {
        self.live.push((conn_id, observer));
    }

    pub fn unsubscribe_live(&mut self, conn_id: ConnectionId) {
        self.live.retain(|(id, _)| *id != conn_id);
    }

    pub fn broadcast_live(&mut self, message: &LiveGamesUpdate) {
        self.live
            .retain(|(_, observer)| observe(observer, message.clone()));
    }

    pub fn subscribe_eval(&mut self, game_id: GameId, subscriber: EvalSubscriber) {
        self.eval.entry(game_id).or_default().push(subscriber);
    }

    pub fn unsubscribe_eval(&mut self, game_id: &GameId, conn_id: ConnectionId) {
        if let Some(subscribers) = self.eval.get_mut(game_id) {
            subscribers.retain(|s| s.conn_id != conn_id);
            if subscribers.is_empty() {
                self.eval.remove(game_id);
            }
        }
    }

    pub fn broadcast_eval(&mut self, game_id: &GameId, message: &EvalServerMessage) {
        if let Some(subscribers) = self.eval.get_mut(game_id) {
            subscribers.retain(|s| {
                let delivered = observe(&s.observer, message.clone());
                if !delivered {
                    debug!("dropping dead eval subscriber of {game_id}");
                }
                delivered
            });
        }
    }

    pub fn send_to_eval_conn(
        &mut self,
        game_id: &GameId,
        conn_id: ConnectionId,
        message: EvalServerMessage,
    ) {
        if let Some(subscriber) = self
            .eval
            .get(game_id)
            .and_then(|subscribers| subscribers.iter().find(|s| s.conn_id == conn_id))
        {
            observe(&subscriber.observer, message);
        }
    }

    pub fn eval_subscriber_count(&self, game_id: &GameId) -> usize {
        self.eval.get(game_id).map(Vec::len).unwrap_or(0)
    }

    /// Close every subscriber of every topic; used while draining.
    pub fn close_all(&mut self) {
        for subscribers in self.game.values() {
            for subscriber in subscribers {
                observe_close(&subscriber.observer, CLOSE_NORMAL);
            }
        }
        self.game.clear();
        for (_, observer) in self.lobby.drain(..) {
            observe_close(&observer, CLOSE_NORMAL);
        }
        for (_, observer) in self.live.drain(..) {
            observe_close(&observer, CLOSE_NORMAL);
        }
        for subscribers in self.eval.values() {
            for subscriber in subscribers {
                observe_close(&subscriber.observer, CLOSE_NORMAL);
            }
        }
        self.eval.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverUpdate;
    use tokio::sync::mpsc::unbounded_channel;
    use wallgame_common::protocol::GameServerMessage;

    fn subscriber(
        seat: Option<PlayerNumber>,
    ) -> (
        GameSubscriber,
        tokio::sync::mpsc::UnboundedReceiver<ObserverUpdate<GameServerMessage>>,
    ) {
        let (tx, rx) = unbounded_channel();
        (
            GameSubscriber {
                conn_id: ConnectionId::next(),
                seat,
                observer: tx,
            },
            rx,
        )
    }

    #[test]
    fn opponent_only_skips_sender_and_spectators() {
        let mut topics = Topics::default();
        let game_id = GameId::new("g1");
        let (host, mut host_rx) = subscriber(Some(PlayerNumber::One));
        let (joiner, mut joiner_rx) = subscriber(Some(PlayerNumber::Two));
        let (watcher, mut watcher_rx) = subscriber(None);
        topics.subscribe_game(game_id.clone(), host);
        topics.subscribe_game(game_id.clone(), joiner);
        topics.subscribe_game(game_id.clone(), watcher);

        topics.send_opponent_only(&game_id, PlayerNumber::One, &GameServerMessage::DrawOffer);

        assert!(matches!(
            joiner_rx.try_recv(),
            Ok(ObserverUpdate::Send {
                message: GameServerMessage::DrawOffer
            })
        ));
        assert!(host_rx.try_recv().is_err());
        assert!(watcher_rx.try_recv().is_err());
    }

    #[test]
    fn dead_subscribers_are_pruned() {
        let mut topics = Topics::default();
        let game_id = GameId::new("g2");
        let (alive, mut alive_rx) = subscriber(None);
        let (dead, dead_rx) = subscriber(None);
        drop(dead_rx);
        topics.subscribe_game(game_id.clone(), alive);
        topics.subscribe_game(game_id.clone(), dead);

        topics.broadcast_game(&game_id, &GameServerMessage::RematchRejected);
        topics.broadcast_game(&game_id, &GameServerMessage::RematchRejected);

        assert!(alive_rx.try_recv().is_ok());
        assert!(alive_rx.try_recv().is_ok());
    }
}

// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::observer::{ConnectionId, Observer};
use log::info;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use wallgame_common::game::Variant;
use wallgame_common::protocol::{BotConfig, BotServerMessage, ClientInfo};
use wallgame_common::{BgsId, BotId, BotSummaryDto, ClientId, CompositeId, GameId, PlayerNumber};

/// Default cap on simultaneously attached bot clients.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// A game one bot is currently seated in.
#[derive(Clone, Debug)]
pub struct ActiveBotGame {
    pub player: PlayerNumber,
    pub opponent_name: String,
    pub started_at: Instant,
}

/// One playable identity registered by a client.
pub struct RegisteredBot {
    pub composite_id: CompositeId,
    pub config: BotConfig,
    /// The attach carried the server's official secret for this bot.
    pub official: bool,
    pub active_games: HashMap<GameId, ActiveBotGame>,
}

impl RegisteredBot {
    fn visible_to(&self, username: Option<&str>) -> bool {
        match self.config.username.as_deref() {
            None => true,
            Some(owner) => username.is_some_and(|u| u.eq_ignore_ascii_case(owner)),
        }
    }

    fn supports(&self, variant: Variant, board: Option<(u8, u8)>) -> bool {
        match self.config.variants.get(&variant) {
            None => false,
            Some(support) => match board {
                None => true,
                Some((w, h)) => support.supports_board(w, h),
            },
        }
    }

    fn summary(&self) -> BotSummaryDto {
        BotSummaryDto {
            composite_id: self.composite_id.clone(),
            name: self.config.name.clone(),
            official: self.official,
            appearance: self.config.appearance.clone(),
            board_width: None,
            board_height: None,
            active_games: self.active_games.len() as u32,
        }
    }
}

/// A connected bot process and the bots it serves.
pub struct BotClient {
    pub client_id: ClientId,
    pub info: ClientInfo,
    pub conn_id: ConnectionId,
    pub observer: Observer<BotServerMessage>,
    pub bots: HashMap<BotId, RegisteredBot>,
    pub attached_at: Instant,
    pub invalid_messages: u32,
    pub active_bgs: HashSet<BgsId>,
}

pub enum Registration {
    New,
    /// The prior socket of the same client id; the caller closes it.
    Replaced(BotClient),
}

/// Connected bot clients and discovery over their bots.
pub struct BotRegistry {
    clients: HashMap<ClientId, BotClient>,
    max_clients: usize,
}

impl BotRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// True when another (non-reattaching) client would exceed the cap.
    pub fn at_capacity(&self, client_id: &ClientId) -> bool {
        self.clients.len() >= self.max_clients && !self.clients.contains_key(client_id)
    }

    /// Atomically replaces any prior registration of the same id.
    pub fn register(&mut self, client: BotClient) -> Registration {
        let client_id = client.client_id.clone();
        match self.clients.insert(client_id.clone(), client) {
            Some(existing) => {
                info!("bot client {client_id} replaced its connection");
                Registration::Replaced(existing)
            }
            None => {
                info!("bot client {client_id} attached");
                Registration::New
            }
        }
    }

    pub fn unregister(&mut self, client_id: &ClientId) -> Option<BotClient> {
        let removed = self.clients.remove(client_id);
        if removed.is_some() {
            info!("bot client {client_id} unregistered");
        }
        removed
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&BotClient> {
        self.clients.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &ClientId) -> Option<&mut BotClient> {
        self.clients.get_mut(client_id)
    }

    pub fn bot(&self, composite_id: &CompositeId) -> Option<&RegisteredBot> {
        self.clients
            .get(&composite_id.client_id())?
            .bots
            .get(&composite_id.bot_id())
    }

    pub fn bot_mut(&mut self, composite_id: &CompositeId) -> Option<&mut RegisteredBot> {
        self.clients
            .get_mut(&composite_id.client_id())?
            .bots
            .get_mut(&composite_id.bot_id())
    }

    /// Outbound channel of the client serving `composite_id`.
    pub fn observer_of(&self, composite_id: &CompositeId) -> Option<Observer<BotServerMessage>> {
        self.clients
            .get(&composite_id.client_id())
            .filter(|client| client.bots.contains_key(&composite_id.bot_id()))
            .map(|client| client.observer.clone())
    }

    /// Counts a malformed or unexpected message; returns the new total.
    pub fn note_invalid(&mut self, client_id: &ClientId) -> u32 {
        match self.clients.get_mut(client_id) {
            Some(client) => {
                client.invalid_messages += 1;
                client.invalid_messages
            }
            None => 0,
        }
    }

    /// Bots playable for `variant` (and board, when given) by `username`.
    /// Official bots sort first, then by name.
    pub fn list_matching(
        &self,
        variant: Variant,
        board: Option<(u8, u8)>,
        username: Option<&str>,
    ) -> Vec<BotSummaryDto> {
        let mut bots: Vec<&RegisteredBot> = self
            .clients
            .values()
            .flat_map(|client| client.bots.values())
            .filter(|bot| bot.visible_to(username) && bot.supports(variant, board))
            .collect();
        bots.sort_by(|a, b| {
            b.official
                .cmp(&a.official)
                .then_with(|| a.config.name.cmp(&b.config.name))
        });
        bots.into_iter().map(RegisteredBot::summary).collect()
    }

    /// One listing per recommended board, smallest boards first.
    pub fn list_recommended(&self, variant: Variant, username: Option<&str>) -> Vec<BotSummaryDto> {
        let mut listings: Vec<(bool, String, u16, BotSummaryDto)> = Vec::new();
        for client in self.clients.values() {
            for bot in client.bots.values() {
                if !bot.visible_to(username) {
                    continue;
                }
                let Some(support) = bot.config.variants.get(&variant) else {
                    continue;
                };
                for board in &support.recommended {
                    let mut summary = bot.summary();
                    summary.board_width = Some(board.board_width);
                    summary.board_height = Some(board.board_height);
                    listings.push((
                        bot.official,
                        bot.config.name.clone(),
                        board.board_width as u16 * board.board_height as u16,
                        summary,
                    ));
                }
            }
        }
        listings.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        listings.into_iter().map(|(_, _, _, dto)| dto).collect()
    }

    /// First official bot able to evaluate this board.
    pub fn find_eval_bot(&self, variant: Variant, width: u8, height: u8) -> Option<CompositeId> {
        let mut candidates: Vec<&RegisteredBot> = self
            .clients
            .values()
            .flat_map(|client| client.bots.values())
            .filter(|bot| bot.official && bot.supports(variant, Some((width, height))))
            .collect();
        candidates.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        candidates.first().map(|bot| bot.composite_id.clone())
    }

    pub fn clients(&self) -> impl Iterator<Item = &BotClient> {
        self.clients.values()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use wallgame_common::protocol::{DimRange, RecommendedBoard, VariantSupport};

    fn support(min: u8, max: u8, recommended: &[(u8, u8)]) -> VariantSupport {
        VariantSupport {
            board_width: DimRange { min, max },
            board_height: DimRange { min, max },
            recommended: recommended
                .iter()
                .map(|&(w, h)| RecommendedBoard {
                    board_width: w,
                    board_height: h,
                })
                .collect(),
        }
    }

    fn bot(client: &str, id: &str, name: &str, official: bool, username: Option<&str>) -> RegisteredBot {
        let bot_id = BotId::new(id);
        RegisteredBot {
            composite_id: CompositeId::new(&ClientId::new(client), &bot_id),
            config: BotConfig {
                bot_id,
                name: name.to_owned(),
                official_token: None,
                username: username.map(str::to_owned),
                appearance: None,
                variants: [(Variant::Standard, support(3, 9, &[(7, 7), (5, 5)]))]
                    .into_iter()
                    .collect(),
            },
            official,
            active_games: HashMap::new(),
        }
    }

    fn client_with(bots: Vec<RegisteredBot>) -> BotClient {
        let client_id = bots
            .first()
            .map(|b| b.composite_id.client_id())
            .unwrap_or_else(|| ClientId::new("empty"));
        let (tx, _rx) = unbounded_channel();
        std::mem::forget(_rx);
        BotClient {
            client_id,
            info: ClientInfo {
                name: "runner".to_owned(),
                version: "1.0".to_owned(),
            },
            conn_id: ConnectionId::next(),
            observer: tx,
            bots: bots
                .into_iter()
                .map(|b| (b.composite_id.bot_id(), b))
                .collect(),
            attached_at: Instant::now(),
            invalid_messages: 0,
            active_bgs: HashSet::new(),
        }
    }

    #[test]
    fn discovery_filters_and_orders() {
        let mut registry = BotRegistry::new(DEFAULT_MAX_CLIENTS);
        registry.register(client_with(vec![
            bot("acme", "zeta", "Zeta", false, None),
            bot("acme", "alpha", "Alpha", false, None),
            bot("acme", "officio", "Officio", true, None),
            bot("acme", "private", "Private", false, Some("Ada")),
        ]));

        let names: Vec<String> = registry
            .list_matching(Variant::Standard, Some((5, 5)), None)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["Officio", "Alpha", "Zeta"]);

        // Visible to its owner, case-insensitively.
        let names: Vec<String> = registry
            .list_matching(Variant::Standard, None, Some("ada"))
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["Officio", "Alpha", "Private", "Zeta"]);

        // Out-of-range board filters everything out.
        assert!(registry
            .list_matching(Variant::Standard, Some((12, 12)), None)
            .is_empty());
        assert!(registry
            .list_matching(Variant::Classic, None, None)
            .is_empty());
    }

    #[test]
    fn recommended_orders_by_area() {
        let mut registry = BotRegistry::new(DEFAULT_MAX_CLIENTS);
        registry.register(client_with(vec![bot("acme", "b", "Bot", false, None)]));
        let boards: Vec<(u8, u8)> = registry
            .list_recommended(Variant::Standard, None)
            .into_iter()
            .map(|b| (b.board_width.unwrap(), b.board_height.unwrap()))
            .collect();
        assert_eq!(boards, [(5, 5), (7, 7)]);
    }

    #[test]
    fn eval_bot_must_be_official() {
        let mut registry = BotRegistry::new(DEFAULT_MAX_CLIENTS);
        registry.register(client_with(vec![bot("acme", "plain", "Plain", false, None)]));
        assert!(registry.find_eval_bot(Variant::Standard, 5, 5).is_none());

        registry.register(client_with(vec![bot("corp", "off", "Off", true, None)]));
        assert_eq!(
            registry.find_eval_bot(Variant::Standard, 5, 5),
            Some(CompositeId::new(&ClientId::new("corp"), &BotId::new("off")))
        );
        assert!(registry.find_eval_bot(Variant::Standard, 11, 11).is_none());
    }

    #[test]
    fn capacity_counts_distinct_clients() {
        let mut registry = BotRegistry::new(2);
        registry.register(client_with(vec![bot("a", "x", "X", false, None)]));
        registry.register(client_with(vec![bot("b", "x", "X", false, None)]));
        assert!(registry.at_capacity(&ClientId::new("c")));
        // Re-attaching an existing client is always allowed.
        assert!(!registry.at_capacity(&ClientId::new("a")));
    }

    #[test]
    fn reattach_replaces() {
        let mut registry = BotRegistry::new(2);
        registry.register(client_with(vec![bot("a", "x", "X", false, None)]));
        match registry.register(client_with(vec![bot("a", "y", "Y", false, None)])) {
            Registration::Replaced(old) => {
                assert!(old.bots.contains_key(&BotId::new("x")));
            }
            Registration::New => panic!("expected replacement"),
        }
        // Discovery only sees the new registration.
        let names: Vec<String> = registry
            .list_matching(Variant::Standard, None, None)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, ["Y"]);
    }
}

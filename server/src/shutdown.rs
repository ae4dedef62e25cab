// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::actor::ServerActor;
use crate::observer::observe_close;
use crate::service::BgsError;
use actix::{ActorContext, Context as ActorCtx, Handler, Message};
use log::info;
use wallgame_common::protocol::CLOSE_NORMAL;

/// Asks the server to drain: close every socket, end every bot game
/// session, and stop.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Drain;

impl Handler<Drain> for ServerActor {
    type Result = ();

    fn handle(&mut self, _drain: Drain, ctx: &mut ActorCtx<Self>) {
        info!("draining");
        for client_id in self.registry.client_ids() {
            let composites: Vec<_> = self
                .registry
                .get(&client_id)
                .map(|client| client.bots.values().map(|b| b.composite_id.clone()).collect())
                .unwrap_or_default();
            for composite in composites {
                self.bgs.end_all_for_bot(&composite, BgsError::SessionEnded);
            }
            if let Some(client) = self.registry.unregister(&client_id) {
                observe_close(&client.observer, CLOSE_NORMAL);
            }
        }
        self.topics.close_all();
        ctx.stop();
    }
}

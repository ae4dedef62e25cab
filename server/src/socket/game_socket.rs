// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::{frame_size_ok, send_close, text_frame};
use crate::actor::{GameConnect, GameDisconnect, GameFrame, ServerActor};
use crate::observer::{ConnectionId, ObserverUpdate};
use crate::rate_limiter::{RateLimiterProps, RateLimiterState};
use actix::Addr;
use axum::extract::ws::{Message, WebSocket};
use log::debug;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use wallgame_common::protocol::{GameClientMessage, GameServerMessage, CLOSE_NORMAL, CLOSE_POLICY};
use wallgame_common::{AccessToken, GameId};

const INBOUND_RATE: RateLimiterProps =
    RateLimiterProps::const_new(Duration::from_millis(80), 10);

/// Drives one `/ws/games/:id` connection for a player or spectator.
pub async fn serve_game_socket(
    mut socket: WebSocket,
    server: Addr<ServerActor>,
    game_id: GameId,
    socket_token: Option<AccessToken>,
    auth_user_id: Option<String>,
) {
    let conn_id = ConnectionId::next();
    let (observer, mut observer_rx) = unbounded_channel::<ObserverUpdate<GameServerMessage>>();

    let seat = match server
        .send(GameConnect {
            game_id: game_id.clone(),
            conn_id,
            observer,
            socket_token,
            auth_user_id,
        })
        .await
    {
        Ok(Ok(seat)) => seat,
        Ok(Err(reason)) => {
            let _ = socket
                .send(text_frame(&GameServerMessage::Error {
                    message: reason.to_owned(),
                }))
                .await;
            send_close(&mut socket, CLOSE_POLICY).await;
            return;
        }
        Err(_) => return,
    };

    let mut inbound_rate = RateLimiterState::default();
    let close_code: Option<u16> = loop {
        tokio::select! {
            frame = socket.recv() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        debug!("game socket error: {err}");
                        break None;
                    }
                };
                if !frame_size_ok(text.len()) {
                    break Some(CLOSE_POLICY);
                }
                if inbound_rate.should_limit_rate(&INBOUND_RATE) {
                    debug!("rate-limiting game socket of {game_id}");
                    continue;
                }
                match serde_json::from_str::<GameClientMessage>(&text) {
                    Ok(message) => server.do_send(GameFrame {
                        game_id: game_id.clone(),
                        conn_id,
                        seat,
                        message,
                    }),
                    Err(err) => debug!("undecodable game frame: {err}"),
                }
            }
            update = observer_rx.recv() => {
                match update {
                    Some(ObserverUpdate::Send { message }) => {
                        if socket.send(text_frame(&message)).await.is_err() {
                            break None;
                        }
                    }
                    Some(ObserverUpdate::Close { code }) => break Some(code),
                    None => break Some(CLOSE_NORMAL),
                }
            }
        }
    };

    if let Some(code) = close_code {
        send_close(&mut socket, code).await;
    }
    server.do_send(GameDisconnect {
        game_id,
        conn_id,
        seat,
    });
}

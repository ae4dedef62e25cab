// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::{send_close, text_frame};
use crate::actor::{
    LiveSubscribe, LiveUnsubscribe, LobbySubscribe, LobbyUnsubscribe, ServerActor,
};
use crate::observer::{ConnectionId, ObserverUpdate};
use actix::Addr;
use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use tokio::sync::mpsc::unbounded_channel;
use wallgame_common::{LiveGamesUpdate, LobbyUpdate};

/// `/ws/lobby`: a read-only feed of joinable matchmaking games.
pub async fn serve_lobby_socket(socket: WebSocket, server: Addr<ServerActor>) {
    let conn_id = ConnectionId::next();
    let (observer, observer_rx) = unbounded_channel::<ObserverUpdate<LobbyUpdate>>();
    server.do_send(LobbySubscribe { conn_id, observer });
    serve_feed(socket, observer_rx).await;
    server.do_send(LobbyUnsubscribe { conn_id });
}

/// `/ws/live`: a read-only feed of in-progress games, diffed.
pub async fn serve_live_socket(socket: WebSocket, server: Addr<ServerActor>) {
    let conn_id = ConnectionId::next();
    let (observer, observer_rx) = unbounded_channel::<ObserverUpdate<LiveGamesUpdate>>();
    server.do_send(LiveSubscribe { conn_id, observer });
    serve_feed(socket, observer_rx).await;
    server.do_send(LiveUnsubscribe { conn_id });
}

async fn serve_feed<O: Serialize>(
    mut socket: WebSocket,
    mut observer_rx: tokio::sync::mpsc::UnboundedReceiver<ObserverUpdate<O>>,
) {
    let close_code: Option<u16> = loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break None,
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
                    None => break None,
                }
            }
        }
    };
    if let Some(code) = close_code {
        send_close(&mut socket, code).await;
    }
}

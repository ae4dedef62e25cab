// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::{frame_size_ok, send_close, text_frame};
use crate::actor::{EvalSubscribe, EvalUnsubscribe, ServerActor};
use crate::observer::{ConnectionId, ObserverUpdate};
use actix::Addr;
use axum::extract::ws::{Message, WebSocket};
use futures::pin_mut;
use log::debug;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use wallgame_common::protocol::{
    EvalClientMessage, EvalRejectCode, EvalServerMessage, CLOSE_POLICY,
};
use wallgame_common::{AccessToken, GameId};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_HARD_TIMEOUT: Duration = Duration::from_secs(120);

/// Drives one `/ws/eval/:gameId` subscriber.
pub async fn serve_eval_socket(
    mut socket: WebSocket,
    server: Addr<ServerActor>,
    game_id: GameId,
    viewer_token: Option<AccessToken>,
) {
    let conn_id = ConnectionId::next();
    let (observer, mut observer_rx) = unbounded_channel::<ObserverUpdate<EvalServerMessage>>();

    // The first frame must be the handshake, promptly.
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, socket.recv()).await;
    let accepted = match handshake {
        Ok(Some(Ok(Message::Text(text)))) if frame_size_ok(text.len()) => {
            match serde_json::from_str::<EvalClientMessage>(&text) {
                Ok(EvalClientMessage::Handshake {
                    game_id: declared, ..
                }) if declared == game_id => {
                    server
                        .send(EvalSubscribe {
                            conn_id,
                            observer: observer.clone(),
                            game_id: game_id.clone(),
                            viewer_token,
                        })
                        .await
                        .ok()
                }
                Ok(EvalClientMessage::Handshake { .. }) => Some(Err(crate::actor::EvalRejection {
                    code: EvalRejectCode::GameNotFound,
                    message: "handshake names a different game".to_owned(),
                })),
                _ => None,
            }
        }
        _ => None,
    };

    match accepted {
        Some(Ok(())) => {
            let _ = socket
                .send(text_frame(&EvalServerMessage::HandshakeAccepted))
                .await;
        }
        Some(Err(rejection)) => {
            let _ = socket
                .send(text_frame(&EvalServerMessage::HandshakeRejected {
                    code: rejection.code,
                    message: rejection.message,
                }))
                .await;
            send_close(&mut socket, CLOSE_POLICY).await;
            return;
        }
        None => {
            send_close(&mut socket, CLOSE_POLICY).await;
            return;
        }
    }

    let keep_alive = tokio::time::sleep(KEEPALIVE_HARD_TIMEOUT);
    pin_mut!(keep_alive);

    let close_code: Option<u16> = loop {
        tokio::select! {
            frame = socket.recv() => {
                keep_alive
                    .as_mut()
                    .reset(tokio::time::Instant::now() + KEEPALIVE_HARD_TIMEOUT);
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<EvalClientMessage>(&text) {
                            Ok(EvalClientMessage::Ping) => {
                                if socket.send(text_frame(&EvalServerMessage::Pong)).await.is_err() {
                                    break None;
                                }
                            }
                            other => debug!("ignoring eval frame {other:?}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("eval socket error: {err}");
                        break None;
                    }
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
            _ = &mut keep_alive => {
                debug!("eval subscriber of {game_id} went quiet");
                break None;
            }
        }
    };

    if let Some(code) = close_code {
        send_close(&mut socket, code).await;
    }
    server.do_send(EvalUnsubscribe { game_id, conn_id });
}

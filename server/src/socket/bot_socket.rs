// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::{frame_size_ok, send_close, text_frame};
use crate::actor::{
    BotFrame, BotInvalidMessage, BotSocketClosed, ServerActor, TryAttach,
};
use crate::observer::{ConnectionId, ObserverUpdate};
use crate::rate_limiter::{RateLimiterProps, RateLimiterState};
use actix::Addr;
use axum::extract::ws::{Message, WebSocket};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use wallgame_common::protocol::{
    BotClientMessage, BotServerMessage, CLOSE_POLICY, MIN_CLIENT_MESSAGE_INTERVAL_MS,
};
use wallgame_common::ClientId;

/// Pre-attach strikes before the socket is dropped.
const OPENED_STRIKE_LIMIT: u32 = 100;

/// Send-rate floor advertised at attach, with some slack for bursts of
/// session traffic.
const INBOUND_RATE: RateLimiterProps = RateLimiterProps::const_new(
    Duration::from_millis(MIN_CLIENT_MESSAGE_INTERVAL_MS),
    30,
);

/// Drives one `/ws/custom-bot` connection: a strict attach handshake,
/// then frame shuttling between the socket and the server actor.
pub async fn serve_bot_socket(mut socket: WebSocket, server: Addr<ServerActor>) {
    let conn_id = ConnectionId::next();
    let (observer, mut observer_rx) = unbounded_channel::<ObserverUpdate<BotServerMessage>>();

    // Opened: the only acceptable message is `attach`.
    let mut strikes = 0u32;
    let client_id: ClientId = loop {
        let frame = tokio::select! {
            frame = socket.recv() => frame,
            update = observer_rx.recv() => {
                match update {
                    Some(ObserverUpdate::Close { code }) => {
                        send_close(&mut socket, code).await;
                        return;
                    }
                    Some(ObserverUpdate::Send { message }) => {
                        let _ = socket.send(text_frame(&message)).await;
                        continue;
                    }
                    None => return,
                }
            }
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Binary(_))) => {
                strikes += 1;
                if strikes >= OPENED_STRIKE_LIMIT {
                    send_close(&mut socket, CLOSE_POLICY).await;
                    return;
                }
                continue;
            }
            Some(Err(err)) => {
                debug!("bot socket error before attach: {err}");
                return;
            }
        };

        let parsed = frame_size_ok(text.len())
            .then(|| serde_json::from_str::<BotClientMessage>(&text).ok())
            .flatten();
        match parsed {
            Some(BotClientMessage::Attach {
                protocol_version,
                client_id,
                bots,
                client,
            }) => {
                let attach = TryAttach {
                    conn_id,
                    observer: observer.clone(),
                    protocol_version,
                    client_id: client_id.clone(),
                    bots,
                    client,
                };
                match server.send(attach).await {
                    Ok(Ok(())) => break client_id,
                    Ok(Err(rejection)) => {
                        info!("attach rejected: {:?} {}", rejection.code, rejection.message);
                        let _ = socket
                            .send(text_frame(&BotServerMessage::AttachRejected {
                                code: rejection.code,
                                message: rejection.message,
                            }))
                            .await;
                        send_close(&mut socket, CLOSE_POLICY).await;
                        return;
                    }
                    Err(_) => return,
                }
            }
            _ => {
                strikes += 1;
                if strikes >= OPENED_STRIKE_LIMIT {
                    warn!("socket exceeded the pre-attach strike limit");
                    send_close(&mut socket, CLOSE_POLICY).await;
                    return;
                }
            }
        }
    };

    // Attached: shuttle frames until either side hangs up.
    let mut inbound_rate = RateLimiterState::default();
    let close_code: Option<u16> = loop {
        tokio::select! {
            frame = socket.recv() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Binary(_))) => {
                        server.do_send(BotInvalidMessage { client_id: client_id.clone() });
                        continue;
                    }
                    Some(Err(err)) => {
                        debug!("bot socket error: {err}");
                        break None;
                    }
                };
                if inbound_rate.should_limit_rate(&INBOUND_RATE) {
                    debug!("rate-limiting bot client {client_id}");
                    continue;
                }
                if !frame_size_ok(text.len()) {
                    server.do_send(BotInvalidMessage { client_id: client_id.clone() });
                    continue;
                }
                match serde_json::from_str::<BotClientMessage>(&text) {
                    Ok(message) => server.do_send(BotFrame {
                        client_id: client_id.clone(),
                        conn_id,
                        message,
                    }),
                    Err(err) => {
                        debug!("undecodable frame from {client_id}: {err}");
                        server.do_send(BotInvalidMessage { client_id: client_id.clone() });
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
        }
    };

    if let Some(code) = close_code {
        send_close(&mut socket, code).await;
    }
    server.do_send(BotSocketClosed { client_id, conn_id });
}

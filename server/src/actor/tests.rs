// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end flows against a real [`ServerActor`], with the test
//! playing the part of the bot client and of the human sockets.

use super::*;
use crate::observer::{ConnectionId, ObserverUpdate};
use crate::service::{CreateParams, HostIdentity, JoinIdentity, LogPersister};
use actix::Actor;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use wallgame_common::game::{BoardDims, EndReason, MatchType, TimeControl, Variant};
use wallgame_common::protocol::{
    AttachRejectCode, BotClientMessage, BotConfig, BotServerMessage, ClientInfo, DimRange,
    EvalServerMessage, GameClientMessage, GameServerMessage, RecommendedBoard, VariantSupport,
    PROTOCOL_VERSION,
};
use wallgame_common::{
    AccessToken, BotId, ClientId, CompositeId, GameId, PlayerNumber, SessionStatus,
};

const OFFICIAL_SECRET: &str = "official-secret";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn actor() -> actix::Addr<ServerActor> {
    ServerActor::new(
        CoreConfig {
            official_secret: Some(OFFICIAL_SECRET.to_owned()),
            max_bot_clients: 10,
            server_info: CoreConfig::server_info(),
        },
        Box::new(LogPersister),
    )
    .start()
}

fn support() -> VariantSupport {
    VariantSupport {
        board_width: DimRange { min: 3, max: 9 },
        board_height: DimRange { min: 3, max: 9 },
        recommended: vec![RecommendedBoard {
            board_width: 3,
            board_height: 3,
        }],
    }
}

fn bot_config(bot_id: &str, official: bool) -> BotConfig {
    BotConfig {
        bot_id: BotId::new(bot_id),
        name: bot_id.to_owned(),
        official_token: official.then(|| OFFICIAL_SECRET.to_owned()),
        username: None,
        appearance: None,
        variants: [(Variant::Standard, support())].into_iter().collect(),
    }
}

#[derive(Debug)]
struct TestBot {
    client_id: ClientId,
    conn_id: ConnectionId,
    rx: UnboundedReceiver<ObserverUpdate<BotServerMessage>>,
}

async fn attach(
    server: &actix::Addr<ServerActor>,
    client_id: &str,
    bots: Vec<BotConfig>,
) -> Result<TestBot, AttachRejection> {
    let (observer, rx) = unbounded_channel();
    let conn_id = ConnectionId::next();
    server
        .send(TryAttach {
            conn_id,
            observer,
            protocol_version: PROTOCOL_VERSION,
            client_id: ClientId::new(client_id),
            bots,
            client: ClientInfo {
                name: "test-runner".to_owned(),
                version: "0.0".to_owned(),
            },
        })
        .await
        .unwrap()?;
    let mut bot = TestBot {
        client_id: ClientId::new(client_id),
        conn_id,
        rx,
    };
    match bot.next().await {
        BotServerMessage::Attached {
            protocol_version, ..
        } => assert_eq!(protocol_version, PROTOCOL_VERSION),
        other => panic!("expected attached, got {other:?}"),
    }
    Ok(bot)
}

impl TestBot {
    async fn next(&mut self) -> BotServerMessage {
        loop {
            let update = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for a bot frame")
                .expect("bot channel closed");
            match update {
                ObserverUpdate::Send { message } => break message,
                ObserverUpdate::Close { .. } => panic!("unexpected close"),
            }
        }
    }

    fn reply(&self, server: &actix::Addr<ServerActor>, message: BotClientMessage) {
        server.do_send(BotFrame {
            client_id: self.client_id.clone(),
            conn_id: self.conn_id,
            message,
        });
    }
}

fn params(board: u8) -> CreateParams {
    CreateParams {
        variant: Variant::Standard,
        board: BoardDims {
            width: board,
            height: board,
        },
        time_control: TimeControl::rapid(),
        rated: false,
        match_type: MatchType::Friend,
        host_is_player_one: Some(true),
    }
}

fn human(name: &str) -> HostIdentity {
    HostIdentity {
        display_name: name.to_owned(),
        appearance: None,
        auth_user_id: None,
        rating: None,
    }
}

async fn ready(server: &actix::Addr<ServerActor>, game_id: &GameId, token: &AccessToken) {
    server
        .send(ReadySeat {
            game_id: game_id.clone(),
            token: token.clone(),
        })
        .await
        .unwrap()
        .unwrap();
}

#[derive(Debug)]
struct EvalViewer {
    rx: UnboundedReceiver<ObserverUpdate<EvalServerMessage>>,
}

impl EvalViewer {
    async fn next(&mut self) -> EvalServerMessage {
        let update = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for an eval frame")
            .expect("eval channel closed");
        match update {
            ObserverUpdate::Send { message } => message,
            ObserverUpdate::Close { .. } => panic!("unexpected close"),
        }
    }
}

async fn subscribe_eval(
    server: &actix::Addr<ServerActor>,
    game_id: &GameId,
) -> Result<EvalViewer, EvalRejection> {
    let (observer, rx) = unbounded_channel();
    server
        .send(EvalSubscribe {
            conn_id: ConnectionId::next(),
            observer,
            game_id: game_id.clone(),
            viewer_token: None,
        })
        .await
        .unwrap()
        .map(|()| EvalViewer { rx })
}

#[actix::test]
async fn rejects_old_protocol_versions() {
    let server = actor();
    for version in [1, 2] {
        let (observer, _rx) = unbounded_channel();
        let rejection = server
            .send(TryAttach {
                conn_id: ConnectionId::next(),
                observer,
                protocol_version: version,
                client_id: ClientId::new("acme"),
                bots: vec![bot_config("wallbot", false)],
                client: ClientInfo {
                    name: "runner".to_owned(),
                    version: "0.0".to_owned(),
                },
            })
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(rejection.code, AttachRejectCode::ProtocolUnsupported);
    }
}

#[actix::test]
async fn rejects_empty_bot_batches_and_duplicates() {
    let server = actor();
    let rejection = attach(&server, "acme", vec![]).await.unwrap_err();
    assert_eq!(rejection.code, AttachRejectCode::NoBots);

    let rejection = attach(
        &server,
        "acme",
        vec![bot_config("twin", false), bot_config("twin", false)],
    )
    .await
    .unwrap_err();
    assert_eq!(rejection.code, AttachRejectCode::DuplicateBotId);

    let mut bad_token = bot_config("wallbot", false);
    bad_token.official_token = Some("wrong".to_owned());
    let rejection = attach(&server, "acme", vec![bad_token]).await.unwrap_err();
    assert_eq!(rejection.code, AttachRejectCode::InvalidOfficialToken);
}

#[actix::test]
async fn caps_simultaneous_clients() {
    let server = actor();
    let mut keep = Vec::new();
    for i in 0..10 {
        keep.push(
            attach(&server, &format!("client{i}"), vec![bot_config("b", false)])
                .await
                .unwrap(),
        );
    }
    let rejection = attach(&server, "one-too-many", vec![bot_config("b", false)])
        .await
        .unwrap_err();
    assert_eq!(rejection.code, AttachRejectCode::TooManyClients);

    // Re-attaching an existing client is not a new client.
    let replaced = attach(&server, "client0", vec![bot_config("b", false)]).await;
    assert!(replaced.is_ok());
}

#[actix::test]
async fn multi_bot_discovery() {
    let server = actor();
    let _bot = attach(
        &server,
        "acme",
        vec![bot_config("alpha", false), bot_config("beta", false)],
    )
    .await
    .unwrap();

    let listed = server
        .send(ListBots {
            variant: Variant::Standard,
            board: Some((5, 5)),
            username: None,
            recommended: false,
        })
        .await
        .unwrap();
    let ids: Vec<String> = listed
        .into_iter()
        .map(|b| b.composite_id.as_str().to_owned())
        .collect();
    assert!(ids.contains(&"acme:alpha".to_owned()));
    assert!(ids.contains(&"acme:beta".to_owned()));
}

/// The full bot-game round trip of a 3x3 standard game where the human
/// hosts as player one and resigns after one exchange.
#[actix::test]
async fn bot_game_round_trip() {
    let server = actor();
    let mut bot = attach(&server, "acme", vec![bot_config("wallbot", false)])
        .await
        .unwrap();

    let created = server
        .send(CreateBotGame {
            params: params(3),
            host: human("Hosta"),
            composite_id: CompositeId::new(&ClientId::new("acme"), &BotId::new("wallbot")),
        })
        .await
        .unwrap()
        .unwrap();
    let game_id = created.game_id.clone();
    assert_eq!(created.player, PlayerNumber::One);

    // Session start and baseline evaluation.
    let (bgs_id, bot_id) = match bot.next().await {
        BotServerMessage::StartGameSession { bgs_id, bot_id, config } => {
            assert_eq!(config.board_width, 3);
            (bgs_id, bot_id)
        }
        other => panic!("expected start_game_session, got {other:?}"),
    };
    assert_eq!(bgs_id.as_str(), game_id.as_str());
    assert_eq!(bot_id, BotId::new("wallbot"));
    bot.reply(
        &server,
        BotClientMessage::GameSessionStarted {
            bgs_id: bgs_id.clone(),
            success: true,
            error: None,
        },
    );
    match bot.next().await {
        BotServerMessage::EvaluatePosition { expected_ply, .. } => assert_eq!(expected_ply, 0),
        other => panic!("expected evaluate_position, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::EvaluateResponse {
            bgs_id: bgs_id.clone(),
            ply: 0,
            best_move: "---".to_owned(),
            evaluation: 0.0,
            success: true,
            error: None,
        },
    );

    ready(&server, &game_id, &created.token).await;

    // Human passes; the bot catches up and answers.
    server
        .send(GameFrame {
            game_id: game_id.clone(),
            conn_id: ConnectionId::next(),
            seat: Some(PlayerNumber::One),
            message: GameClientMessage::Move {
                notation: "---".to_owned(),
            },
        })
        .await
        .unwrap();

    match bot.next().await {
        BotServerMessage::ApplyMove {
            expected_ply, mv, ..
        } => {
            assert_eq!(expected_ply, 0);
            assert_eq!(mv, "---");
        }
        other => panic!("expected apply_move, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::MoveApplied {
            bgs_id: bgs_id.clone(),
            ply: 0,
            success: true,
            error: None,
        },
    );
    match bot.next().await {
        BotServerMessage::EvaluatePosition { expected_ply, .. } => assert_eq!(expected_ply, 1),
        other => panic!("expected evaluate_position, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::EvaluateResponse {
            bgs_id: bgs_id.clone(),
            ply: 1,
            best_move: "---".to_owned(),
            evaluation: -0.2,
            success: true,
            error: None,
        },
    );

    // The bot's own pass is mirrored into the session.
    match bot.next().await {
        BotServerMessage::ApplyMove { expected_ply, .. } => assert_eq!(expected_ply, 1),
        other => panic!("expected apply_move, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::MoveApplied {
            bgs_id: bgs_id.clone(),
            ply: 1,
            success: true,
            error: None,
        },
    );

    // Human resigns; the bot session is torn down.
    server
        .send(GameFrame {
            game_id: game_id.clone(),
            conn_id: ConnectionId::next(),
            seat: Some(PlayerNumber::One),
            message: GameClientMessage::Resign,
        })
        .await
        .unwrap();
    match bot.next().await {
        BotServerMessage::EndGameSession { bgs_id: ended } => {
            assert_eq!(ended.as_str(), game_id.as_str())
        }
        other => panic!("expected end_game_session, got {other:?}"),
    }

    let view = server
        .send(GetGame {
            game_id: game_id.clone(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, SessionStatus::Completed);
    let result = view.game.result.unwrap();
    assert_eq!(result.winner, Some(PlayerNumber::Two));
    assert_eq!(result.reason, EndReason::Resignation);
}

/// E6: the bot's socket dies mid-game and the human wins by the bot's
/// resignation.
#[actix::test]
async fn bot_disconnect_resigns_its_games() {
    let server = actor();
    let mut bot = attach(&server, "acme", vec![bot_config("wallbot", false)])
        .await
        .unwrap();
    let created = server
        .send(CreateBotGame {
            params: params(3),
            host: human("Hosta"),
            composite_id: CompositeId::new(&ClientId::new("acme"), &BotId::new("wallbot")),
        })
        .await
        .unwrap()
        .unwrap();
    let game_id = created.game_id.clone();

    let bgs_id = match bot.next().await {
        BotServerMessage::StartGameSession { bgs_id, .. } => bgs_id,
        other => panic!("expected start_game_session, got {other:?}"),
    };
    bot.reply(
        &server,
        BotClientMessage::GameSessionStarted {
            bgs_id: bgs_id.clone(),
            success: true,
            error: None,
        },
    );
    match bot.next().await {
        BotServerMessage::EvaluatePosition { .. } => {}
        other => panic!("expected evaluate_position, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::EvaluateResponse {
            bgs_id,
            ply: 0,
            best_move: "---".to_owned(),
            evaluation: 0.0,
            success: true,
            error: None,
        },
    );
    ready(&server, &game_id, &created.token).await;

    server
        .send(BotSocketClosed {
            client_id: bot.client_id.clone(),
            conn_id: bot.conn_id,
        })
        .await
        .unwrap();

    let view = server
        .send(GetGame {
            game_id: game_id.clone(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, SessionStatus::Completed);
    let result = view.game.result.unwrap();
    assert_eq!(result.winner, Some(PlayerNumber::One));
    assert_eq!(result.reason, EndReason::Resignation);

    // Discovery no longer lists the dead client's bots.
    let listed = server
        .send(ListBots {
            variant: Variant::Standard,
            board: None,
            username: None,
            recommended: false,
        })
        .await
        .unwrap();
    assert!(listed.is_empty());
}

/// E5: concurrent eval subscribers of a live human game share one bot
/// session; late subscribers are served from cache.
#[actix::test]
async fn shared_eval_session_is_created_once() {
    let server = actor();
    let mut bot = attach(&server, "official", vec![bot_config("oracle", true)])
        .await
        .unwrap();

    // A live human-vs-human game.
    let created = server
        .send(CreateGame {
            params: params(3),
            host: human("Hosta"),
        })
        .await
        .unwrap();
    let game_id = created.game_id.clone();
    let joined = server
        .send(JoinGame {
            game_id: game_id.clone(),
            identity: JoinIdentity {
                display_name: "Joina".to_owned(),
                appearance: None,
                auth_user_id: None,
                rating: None,
            },
        })
        .await
        .unwrap()
        .unwrap();
    let joiner_token = match joined {
        JoinedGame::Player { token, .. } => token,
        JoinedGame::Spectator => panic!("expected a seat"),
    };
    ready(&server, &game_id, &created.token).await;
    ready(&server, &game_id, &joiner_token).await;

    let mut viewer_a = subscribe_eval(&server, &game_id).await.unwrap();
    let mut viewer_b = subscribe_eval(&server, &game_id).await.unwrap();

    // Exactly one session comes up, evaluating the initial position.
    let bgs_id = match bot.next().await {
        BotServerMessage::StartGameSession { bgs_id, .. } => bgs_id,
        other => panic!("expected start_game_session, got {other:?}"),
    };
    bot.reply(
        &server,
        BotClientMessage::GameSessionStarted {
            bgs_id: bgs_id.clone(),
            success: true,
            error: None,
        },
    );
    match bot.next().await {
        BotServerMessage::EvaluatePosition { expected_ply, .. } => assert_eq!(expected_ply, 0),
        other => panic!("expected evaluate_position, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::EvaluateResponse {
            bgs_id: bgs_id.clone(),
            ply: 0,
            best_move: "b2".to_owned(),
            evaluation: 0.1,
            success: true,
            error: None,
        },
    );

    // Both early subscribers: pending, then the same history.
    for viewer in [&mut viewer_a, &mut viewer_b] {
        assert!(matches!(
            viewer.next().await,
            EvalServerMessage::Pending { total_moves: 0 }
        ));
        match viewer.next().await {
            EvalServerMessage::History { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].ply, 0);
            }
            other => panic!("expected eval-history, got {other:?}"),
        }
    }

    // A third subscriber is served from cache, with no bot round trip.
    let mut viewer_c = subscribe_eval(&server, &game_id).await.unwrap();
    match viewer_c.next().await {
        EvalServerMessage::History { entries } => assert_eq!(entries.len(), 1),
        other => panic!("expected eval-history, got {other:?}"),
    }
    assert!(bot.rx.try_recv().is_err(), "no new bot traffic expected");

    // A move streams through the shared session as an update.
    server
        .send(GameFrame {
            game_id: game_id.clone(),
            conn_id: ConnectionId::next(),
            seat: Some(PlayerNumber::One),
            message: GameClientMessage::Move {
                notation: "b2".to_owned(),
            },
        })
        .await
        .unwrap();
    match bot.next().await {
        BotServerMessage::ApplyMove {
            expected_ply, mv, ..
        } => {
            assert_eq!((expected_ply, mv.as_str()), (0, "b2"));
        }
        other => panic!("expected apply_move, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::MoveApplied {
            bgs_id: bgs_id.clone(),
            ply: 0,
            success: true,
            error: None,
        },
    );
    match bot.next().await {
        BotServerMessage::EvaluatePosition { expected_ply, .. } => assert_eq!(expected_ply, 1),
        other => panic!("expected evaluate_position, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::EvaluateResponse {
            bgs_id: bgs_id.clone(),
            ply: 1,
            best_move: "c2".to_owned(),
            evaluation: 0.3,
            success: true,
            error: None,
        },
    );
    for viewer in [&mut viewer_a, &mut viewer_b, &mut viewer_c] {
        match viewer.next().await {
            EvalServerMessage::Update { ply, best_move, .. } => {
                assert_eq!((ply, best_move.as_str()), (1, "c2"));
            }
            other => panic!("expected eval-update, got {other:?}"),
        }
    }
}

#[actix::test]
async fn eval_without_official_bot_is_rejected() {
    let server = actor();
    // An unofficial bot is connected, but eval requires an official one.
    let _bot = attach(&server, "acme", vec![bot_config("plain", false)])
        .await
        .unwrap();
    let created = server
        .send(CreateGame {
            params: params(3),
            host: human("Hosta"),
        })
        .await
        .unwrap();
    let rejection = subscribe_eval(&server, &created.game_id).await.unwrap_err();
    assert_eq!(
        rejection.code,
        wallgame_common::protocol::EvalRejectCode::NoBot
    );
}

/// A replay subscriber of a finished game gets its own throwaway
/// session and a full dense history.
#[actix::test]
async fn replay_eval_runs_per_viewer() {
    let server = actor();
    let mut bot = attach(&server, "official", vec![bot_config("oracle", true)])
        .await
        .unwrap();

    let created = server
        .send(CreateGame {
            params: params(3),
            host: human("Hosta"),
        })
        .await
        .unwrap();
    let game_id = created.game_id.clone();
    let joined = server
        .send(JoinGame {
            game_id: game_id.clone(),
            identity: JoinIdentity {
                display_name: "Joina".to_owned(),
                appearance: None,
                auth_user_id: None,
                rating: None,
            },
        })
        .await
        .unwrap()
        .unwrap();
    let joiner_token = match joined {
        JoinedGame::Player { token, .. } => token,
        JoinedGame::Spectator => panic!("expected a seat"),
    };
    ready(&server, &game_id, &created.token).await;
    ready(&server, &game_id, &joiner_token).await;

    // One move, then a resignation.
    server
        .send(GameFrame {
            game_id: game_id.clone(),
            conn_id: ConnectionId::next(),
            seat: Some(PlayerNumber::One),
            message: GameClientMessage::Move {
                notation: "b2".to_owned(),
            },
        })
        .await
        .unwrap();
    server
        .send(GameFrame {
            game_id: game_id.clone(),
            conn_id: ConnectionId::next(),
            seat: Some(PlayerNumber::Two),
            message: GameClientMessage::Resign,
        })
        .await
        .unwrap();

    let mut viewer = subscribe_eval(&server, &game_id).await.unwrap();
    assert!(matches!(
        viewer.next().await,
        EvalServerMessage::Pending { total_moves: 1 }
    ));

    // The replay session is not keyed by the bare game id.
    let replay_bgs = match bot.next().await {
        BotServerMessage::StartGameSession { bgs_id, .. } => {
            assert_ne!(bgs_id.as_str(), game_id.as_str());
            assert!(bgs_id.as_str().starts_with(game_id.as_str()));
            bgs_id
        }
        other => panic!("expected start_game_session, got {other:?}"),
    };
    bot.reply(
        &server,
        BotClientMessage::GameSessionStarted {
            bgs_id: replay_bgs.clone(),
            success: true,
            error: None,
        },
    );
    // Dense replay: evaluate, apply, evaluate.
    let mut plies = Vec::new();
    for _ in 0..3 {
        match bot.next().await {
            BotServerMessage::EvaluatePosition { expected_ply, .. } => {
                plies.push(("eval", expected_ply));
                bot.reply(
                    &server,
                    BotClientMessage::EvaluateResponse {
                        bgs_id: replay_bgs.clone(),
                        ply: expected_ply,
                        best_move: "---".to_owned(),
                        evaluation: 0.0,
                        success: true,
                        error: None,
                    },
                );
            }
            BotServerMessage::ApplyMove { expected_ply, .. } => {
                plies.push(("apply", expected_ply));
                bot.reply(
                    &server,
                    BotClientMessage::MoveApplied {
                        bgs_id: replay_bgs.clone(),
                        ply: expected_ply,
                        success: true,
                        error: None,
                    },
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(plies, vec![("eval", 0), ("apply", 0), ("eval", 1)]);

    match viewer.next().await {
        EvalServerMessage::History { entries } => {
            let plies: Vec<u32> = entries.iter().map(|e| e.ply).collect();
            assert_eq!(plies, vec![0, 1]);
        }
        other => panic!("expected eval-history, got {other:?}"),
    }
    // The throwaway session is ended immediately.
    match bot.next().await {
        BotServerMessage::EndGameSession { bgs_id } => assert_eq!(bgs_id, replay_bgs),
        other => panic!("expected end_game_session, got {other:?}"),
    }
}

#[actix::test]
async fn draw_offers_in_bot_games_are_auto_rejected() {
    let server = actor();
    let mut bot = attach(&server, "acme", vec![bot_config("wallbot", false)])
        .await
        .unwrap();
    let created = server
        .send(CreateBotGame {
            params: params(3),
            host: human("Hosta"),
            composite_id: CompositeId::new(&ClientId::new("acme"), &BotId::new("wallbot")),
        })
        .await
        .unwrap()
        .unwrap();
    let game_id = created.game_id.clone();
    let bgs_id = match bot.next().await {
        BotServerMessage::StartGameSession { bgs_id, .. } => bgs_id,
        other => panic!("expected start_game_session, got {other:?}"),
    };
    bot.reply(
        &server,
        BotClientMessage::GameSessionStarted {
            bgs_id: bgs_id.clone(),
            success: true,
            error: None,
        },
    );
    match bot.next().await {
        BotServerMessage::EvaluatePosition { .. } => {}
        other => panic!("expected evaluate_position, got {other:?}"),
    }
    bot.reply(
        &server,
        BotClientMessage::EvaluateResponse {
            bgs_id,
            ply: 0,
            best_move: "---".to_owned(),
            evaluation: 0.0,
            success: true,
            error: None,
        },
    );
    ready(&server, &game_id, &created.token).await;

    // Connect the host's game socket so the rejection has a receiver.
    let (observer, mut rx) = unbounded_channel();
    let conn_id = ConnectionId::next();
    let seat = server
        .send(GameConnect {
            game_id: game_id.clone(),
            conn_id,
            observer,
            socket_token: Some(created.socket_token.clone()),
            auth_user_id: None,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seat, Some(PlayerNumber::One));

    server
        .send(GameFrame {
            game_id: game_id.clone(),
            conn_id,
            seat,
            message: GameClientMessage::DrawOffer,
        })
        .await
        .unwrap();

    let mut saw_rejection = false;
    while let Ok(update) = rx.try_recv() {
        if let ObserverUpdate::Send {
            message: GameServerMessage::DrawRejected,
        } = update
        {
            saw_rejection = true;
        }
    }
    assert!(saw_rejection, "the server rejects draws on the bot's behalf");

    // The bot was never consulted about the draw.
    assert!(bot.rx.try_recv().is_err());
}

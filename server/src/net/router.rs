// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The thin HTTP facade and the WebSocket upgrade points. Every
//! request turns into one actor message; the contracts live in the
//! session store and registry.

use crate::actor::{
    AbortGame, CreateBotGame, CreateGame, GetGame, JoinGame, ListBots, ReadySeat, ServerActor,
};
use crate::service::{CreateParams, HostIdentity, JoinIdentity, SessionError};
use crate::socket::{
    serve_bot_socket, serve_eval_socket, serve_game_socket, serve_live_socket, serve_lobby_socket,
};
use actix::Addr;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use wallgame_common::game::{BoardDims, MatchType, TimeControl, Variant};
use wallgame_common::protocol::MAX_MESSAGE_BYTES;
use wallgame_common::{
    AccessToken, Appearance, CompositeId, GameId, PlayerNumber, SessionView,
};

#[derive(Clone)]
pub struct AppState {
    pub server: Addr<ServerActor>,
}

pub fn new_router(server: Addr<ServerActor>) -> Router {
    Router::new()
        .route("/api/games", post(create_game))
        .route("/api/games/{id}", get(get_game))
        .route("/api/games/{id}/join", post(join_game))
        .route("/api/games/{id}/ready", post(ready_seat))
        .route("/api/games/{id}/abort", post(abort_game))
        .route("/api/bots", get(list_bots))
        .route("/api/bots/recommended", get(list_recommended_bots))
        .route("/api/bots/play", post(play_bot))
        .route("/ws/custom-bot", get(ws_custom_bot))
        .route("/ws/eval/{game_id}", get(ws_eval))
        .route("/ws/games/{id}", get(ws_game))
        .route("/ws/lobby", get(ws_lobby))
        .route("/ws/live", get(ws_live))
        .layer(CorsLayer::permissive())
        .with_state(AppState { server })
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl ApiError {
    fn internal() -> Self {
        Self(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server unavailable".to_owned(),
        )
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match err {
            SessionError::NotFound => StatusCode::NOT_FOUND,
            SessionError::Cancelled => StatusCode::GONE,
            _ => StatusCode::CONFLICT,
        };
        Self(status, err.to_string())
    }
}

fn board(width: u8, height: u8) -> Result<BoardDims, ApiError> {
    let valid = (1..=BoardDims::MAX_SIDE).contains(&width)
        && (1..=BoardDims::MAX_SIDE).contains(&height);
    if !valid {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "unsupported board dimensions".to_owned(),
        ));
    }
    Ok(BoardDims { width, height })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameRequest {
    variant: Variant,
    board_width: u8,
    board_height: u8,
    #[serde(default)]
    time_control: Option<TimeControl>,
    #[serde(default)]
    rated: bool,
    #[serde(default)]
    match_type: Option<MatchType>,
    host_name: String,
    #[serde(default)]
    appearance: Option<Appearance>,
    /// Supplied by the authentication facade, not by clients directly.
    #[serde(default)]
    auth_user_id: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    host_is_player_one: Option<bool>,
}

impl CreateGameRequest {
    fn into_parts(self) -> Result<(CreateParams, HostIdentity), ApiError> {
        let params = CreateParams {
            variant: self.variant,
            board: board(self.board_width, self.board_height)?,
            time_control: self.time_control.unwrap_or_else(TimeControl::rapid),
            rated: self.rated,
            match_type: self.match_type.unwrap_or(MatchType::Friend),
            host_is_player_one: self.host_is_player_one,
        };
        let host = HostIdentity {
            display_name: self.host_name,
            appearance: self.appearance,
            auth_user_id: self.auth_user_id,
            rating: self.rating,
        };
        Ok((params, host))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameResponse {
    game_id: GameId,
    player_id: PlayerNumber,
    token: AccessToken,
    socket_token: AccessToken,
}

async fn create_game(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let (params, host) = request.into_parts()?;
    let created = state
        .server
        .send(CreateGame { params, host })
        .await
        .map_err(|_| ApiError::internal())?;
    info!("created game {} over http", created.game_id);
    Ok(Json(CreateGameResponse {
        game_id: created.game_id,
        player_id: created.player,
        token: created.token,
        socket_token: created.socket_token,
    }))
}

async fn get_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
) -> Result<Json<SessionView>, ApiError> {
    let view = state
        .server
        .send(GetGame { game_id: id })
        .await
        .map_err(|_| ApiError::internal())?
        .ok_or(ApiError(StatusCode::NOT_FOUND, "no such game".to_owned()))?;
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinGameRequest {
    name: String,
    #[serde(default)]
    appearance: Option<Appearance>,
    #[serde(default)]
    auth_user_id: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum JoinGameResponse {
    #[serde(rename = "player", rename_all = "camelCase")]
    Player {
        player_id: PlayerNumber,
        token: AccessToken,
        socket_token: AccessToken,
    },
    #[serde(rename = "spectator")]
    Spectator,
}

async fn join_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    Json(request): Json<JoinGameRequest>,
) -> Result<Json<JoinGameResponse>, ApiError> {
    let identity = JoinIdentity {
        display_name: request.name,
        appearance: request.appearance,
        auth_user_id: request.auth_user_id,
        rating: request.rating,
    };
    let joined = state
        .server
        .send(JoinGame {
            game_id: id,
            identity,
        })
        .await
        .map_err(|_| ApiError::internal())??;
    Ok(Json(match joined {
        crate::actor::JoinedGame::Player {
            player,
            token,
            socket_token,
            ..
        } => JoinGameResponse::Player {
            player_id: player,
            token,
            socket_token,
        },
        crate::actor::JoinedGame::Spectator => JoinGameResponse::Spectator,
    }))
}

#[derive(Deserialize)]
struct TokenRequest {
    token: AccessToken,
}

async fn ready_seat(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    Json(request): Json<TokenRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .server
        .send(ReadySeat {
            game_id: id,
            token: request.token,
        })
        .await
        .map_err(|_| ApiError::internal())?
        .map_err(|reason| ApiError(StatusCode::FORBIDDEN, reason.to_owned()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn abort_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    Json(request): Json<TokenRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .server
        .send(AbortGame {
            game_id: id,
            token: request.token,
        })
        .await
        .map_err(|_| ApiError::internal())?
        .map_err(|reason| ApiError(StatusCode::FORBIDDEN, reason.to_owned()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotsQuery {
    variant: Variant,
    #[serde(default)]
    board_width: Option<u8>,
    #[serde(default)]
    board_height: Option<u8>,
    #[serde(default)]
    username: Option<String>,
}

async fn list_bots(
    State(state): State<AppState>,
    Query(query): Query<BotsQuery>,
) -> Result<Response, ApiError> {
    let bots = state
        .server
        .send(ListBots {
            variant: query.variant,
            board: query.board_width.zip(query.board_height),
            username: query.username,
            recommended: false,
        })
        .await
        .map_err(|_| ApiError::internal())?;
    Ok(Json(bots).into_response())
}

async fn list_recommended_bots(
    State(state): State<AppState>,
    Query(query): Query<BotsQuery>,
) -> Result<Response, ApiError> {
    let bots = state
        .server
        .send(ListBots {
            variant: query.variant,
            board: None,
            username: query.username,
            recommended: true,
        })
        .await
        .map_err(|_| ApiError::internal())?;
    Ok(Json(bots).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayBotRequest {
    composite_id: CompositeId,
    #[serde(flatten)]
    game: CreateGameRequest,
}

async fn play_bot(
    State(state): State<AppState>,
    Json(request): Json<PlayBotRequest>,
) -> Result<Json<CreateGameResponse>, ApiError> {
    let (params, host) = request.game.into_parts()?;
    let created = state
        .server
        .send(CreateBotGame {
            params,
            host,
            composite_id: request.composite_id,
        })
        .await
        .map_err(|_| ApiError::internal())?
        .map_err(|err| ApiError(StatusCode::CONFLICT, err.to_string()))?;
    Ok(Json(CreateGameResponse {
        game_id: created.game_id,
        player_id: created.player,
        token: created.token,
        socket_token: created.socket_token,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketQuery {
    #[serde(default)]
    token: Option<AccessToken>,
    #[serde(default)]
    auth_user_id: Option<String>,
}

async fn ws_custom_bot(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    // The protocol-level cap is enforced in the socket loop so an
    // oversized frame counts as misbehavior instead of a transport
    // error; the transport cap only bounds memory.
    upgrade
        .max_message_size(MAX_MESSAGE_BYTES * 4)
        .max_frame_size(MAX_MESSAGE_BYTES * 4)
        .on_upgrade(move |socket| serve_bot_socket(socket, state.server))
}

async fn ws_eval(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
    Query(query): Query<SocketQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade
        .max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| serve_eval_socket(socket, state.server, game_id, query.token))
}

async fn ws_game(
    State(state): State<AppState>,
    Path(id): Path<GameId>,
    Query(query): Query<SocketQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.max_message_size(MAX_MESSAGE_BYTES).on_upgrade(move |socket| {
        serve_game_socket(socket, state.server, id, query.token, query.auth_user_id)
    })
}

async fn ws_lobby(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| serve_lobby_socket(socket, state.server))
}

async fn ws_live(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| serve_live_socket(socket, state.server))
}

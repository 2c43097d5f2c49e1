use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tower_http::services::ServeDir;
use uuid::Uuid;

use trio_ws::auth::{Authenticator, TokenBook};
use trio_ws::delay::DelayQueue;
use trio_ws::ledger::{MemLedger, UserProfile};
use trio_ws::protocol::{CreateGameReq, ErrorMsg, ReceiveMsg, Response, cmd, code, encode};
use trio_ws::session::ClientTx;
use trio_ws::store::MemStore;
use trio_ws::{Config, GameError, RoomRegistry};

#[derive(Clone)]
struct AppState {
    registry: Arc<RoomRegistry>,
    auth: Arc<dyn Authenticator>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
    #[serde(rename = "gameId")]
    game_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(mut query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // the token travels as a query parameter or as a cookie
    if query.token.is_none() {
        query.token = cookie_token(&headers);
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "token").then(|| value.to_string())
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, query: WsQuery) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<Message>();

    // writer task
    let writer = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let send_error = |tx: &ClientTx, err: &GameError| {
        let _ = tx.send(Message::Text(encode(&ErrorMsg::new(err))));
    };

    let user = match query
        .token
        .as_deref()
        .ok_or(GameError::NotAuthenticated)
        .and_then(|token| state.auth.verify(token))
    {
        Ok(user) => user,
        Err(err) => {
            send_error(&client_tx, &err);
            drop(client_tx);
            let _ = writer.await;
            return;
        }
    };

    let game_id = query.game_id.unwrap_or_default();
    let conn_token = Uuid::new_v4().simple().to_string();
    let session = match state
        .registry
        .attach(&game_id, user.id, &conn_token, client_tx.clone())
    {
        Ok(session) => session,
        Err(err) => {
            send_error(&client_tx, &err);
            drop(client_tx);
            let _ = writer.await;
            return;
        }
    };
    info!(game_id = %game_id, user_id = user.id, "connection online");

    // every connection enters the room as a waiting seat or a resync
    if let Err(err) = session.join(&user, false).await {
        send_error(&client_tx, &err);
    }

    while let Some(Ok(frame)) = ws_rx.next().await {
        let Message::Text(text) = frame else { continue };
        let msg: ReceiveMsg = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(game_id = %game_id, %err, "bad frame");
                continue;
            }
        };

        let result = match msg.kind {
            cmd::READY => session.join(&user, true).await,
            cmd::START => session.start(user.id).await,
            cmd::LOOK_CARD => session.look(user.id, msg.curr_round).await,
            cmd::GIVE_UP => session.give_up(user.id, msg.curr_round, None).await,
            cmd::BET => session.bet(user.id, 0, msg.curr_round, msg.bet_chips).await,
            cmd::COMPARE => {
                session
                    .bet(user.id, msg.compare_id, msg.curr_round, msg.bet_chips)
                    .await
            }
            cmd::AUTO_BET => {
                session
                    .set_auto_bet(user.id, msg.is_auto_bet, msg.curr_round)
                    .await
            }
            other => {
                warn!(game_id = %game_id, kind = other, "unknown command");
                Ok(())
            }
        };
        if let Err(err) = result {
            send_error(&client_tx, &err);
        }
    }

    state.registry.detach(&game_id, user.id, &conn_token);
    info!(game_id = %game_id, user_id = user.id, "connection offline");
    drop(client_tx);
    let _ = writer.await;
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn create_game(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<CreateGameReq>,
) -> Json<Response<String>> {
    let user = match query
        .token
        .as_deref()
        .ok_or(GameError::NotAuthenticated)
        .and_then(|token| state.auth.verify(token))
    {
        Ok(user) => user,
        Err(err) => return Json(Response::fail(code::NOT_LOGIN, err.to_string())),
    };

    match state.registry.create_room(&body, &user).await {
        Ok(game_id) => Json(Response::ok(game_id)),
        Err(err @ GameError::BadRoomConfig) => {
            Json(Response::fail(code::BAD_STAKES, err.to_string()))
        }
        Err(err) => {
            error!(%err, "create room failed");
            Json(Response::fail(code::SYSTEM_ERROR, err.to_string()))
        }
    }
}

/// Demo accounts so the server is playable without a user backend.
fn seed_demo_users(ledger: &MemLedger, tokens: &TokenBook) {
    let demo = [
        (1, "alice", "token-alice"),
        (2, "bob", "token-bob"),
        (3, "carol", "token-carol"),
    ];
    for (id, nickname, token) in demo {
        ledger.add_user(
            UserProfile {
                id,
                nickname: nickname.to_string(),
                head_pic: String::new(),
            },
            10_000,
        );
        tokens.issue(token, id);
        info!(user_id = id, nickname, token, "seeded demo account");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = Config::from_env();
    let store = Arc::new(MemStore::new(Duration::from_secs(
        config.snapshot_ttl_hours * 3600,
    )));
    let ledger = Arc::new(MemLedger::new());
    let delay = DelayQueue::new();

    let tokens = TokenBook::new(ledger.clone());
    seed_demo_users(&ledger, &tokens);

    let registry = RoomRegistry::new(store, ledger, delay, config.clone());
    let _dispatcher = registry.start_dispatcher();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/game/create", post(create_game))
        .nest_service("/", ServeDir::new("public"))
        .with_state(AppState {
            registry,
            auth: tokens,
        });

    let addr: SocketAddr = config.bind_addr.parse().unwrap();
    info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

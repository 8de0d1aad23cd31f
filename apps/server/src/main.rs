#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![cfg_attr(test, allow(clippy::panic))]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use presence_protocol::{decode_client_message, encode_register_rejected, ClientMsg};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod constants;
mod room;
mod room_manager;

use crate::constants::{DEFAULT_PORT, DEFAULT_ROOM_ID, OUTBOUND_CHANNEL_CAPACITY};
use crate::room::{ConnId, ConnSink, RoomHandle};
use crate::room_manager::RoomManager;

struct AppState {
    room_manager: Arc<RoomManager>,
    next_conn_id: AtomicU64,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let state = Arc::new(AppState {
        room_manager: RoomManager::new(Instant::now()),
        next_conn_id: AtomicU64::new(1),
    });

    tokio::spawn(run_console(Arc::clone(&state)));

    let app = Router::new()
        .route("/ws", get(default_room_ws_handler))
        .route("/rooms/:room_id/ws", get(room_ws_handler))
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| DEFAULT_PORT.to_string());
    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).tcp_nodelay(true).await
}

async fn default_room_ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, DEFAULT_ROOM_ID.to_string(), socket))
}

async fn room_ws_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, room_id, socket))
}

async fn handle_socket(state: Arc<AppState>, room_key: String, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(OUTBOUND_CHANNEL_CAPACITY);
    let (close_tx, mut close_rx) = mpsc::channel::<Option<Bytes>>(1);
    let sink = ConnSink { tx, close_tx };
    let conn_id = ConnId(state.next_conn_id.fetch_add(1, Ordering::Relaxed));
    debug!(conn_id = conn_id.0, room_id = room_key.as_str(), "connection opened");

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                close = close_rx.recv() => {
                    if let Some(Some(farewell)) = close {
                        let _ = send_text(&mut sender, farewell).await;
                    }
                    break;
                }
                payload = rx.recv() => {
                    let Some(payload) = payload else {
                        break;
                    };
                    if send_text(&mut sender, payload).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    let mut current_room: Option<Arc<RoomHandle>> = None;

    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = &mut send_task => {
                debug!(conn_id = conn_id.0, "session ended by server");
                break;
            }
        };
        let Some(Ok(msg)) = msg else {
            break;
        };
        match msg {
            Message::Text(text) => match decode_client_message(&text) {
                Ok(msg) => {
                    handle_client_msg(&state, &room_key, &mut current_room, conn_id, msg, &sink)
                        .await;
                }
                Err(err) => {
                    warn!(conn_id = conn_id.0, "dropping bad message: {err}");
                }
            },
            Message::Binary(_) => {
                warn!(conn_id = conn_id.0, "received unexpected binary frame");
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(room) = current_room.take() {
        state.room_manager.deregister(&room, conn_id).await;
    }
    drop(sink);
    send_task.abort();
    debug!(conn_id = conn_id.0, "connection closed");
}

async fn send_text(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: Bytes,
) -> Result<(), axum::Error> {
    let Ok(text) = String::from_utf8(payload.to_vec()) else {
        return Ok(());
    };
    sender.send(Message::Text(text)).await
}

async fn handle_client_msg(
    state: &Arc<AppState>,
    room_key: &str,
    current_room: &mut Option<Arc<RoomHandle>>,
    conn_id: ConnId,
    msg: ClientMsg,
    sink: &ConnSink,
) {
    match msg {
        ClientMsg::Register(register) => {
            match state
                .room_manager
                .register(room_key, conn_id, register, sink.clone())
                .await
            {
                Ok(room) => {
                    *current_room = Some(room);
                }
                Err(err) => {
                    warn!(
                        conn_id = conn_id.0,
                        room_id = room_key,
                        "registration rejected: {}",
                        err.reason()
                    );
                    sink.close(Some(encode_register_rejected(err.reason())));
                }
            }
        }
        ClientMsg::Move(movement) => {
            let Some(room) = current_room.as_ref() else {
                debug!(conn_id = conn_id.0, "dropping move before registration");
                return;
            };
            room.relay(conn_id, movement);
        }
    }
}

async fn run_console(state: Arc<AppState>) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.starts_with("rooms") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            info!("rooms commands: list|info|stats");
            continue;
        }
        match parts[1] {
            "list" => {
                for room in state.room_manager.list_rooms().await {
                    info!(
                        "{} {} participants={} last_activity_ms={}",
                        room.room_id,
                        room.status.as_str(),
                        room.current_participants,
                        room.last_activity_at_ms
                    );
                }
            }
            "info" if parts.len() >= 3 => match state.room_manager.room_info(parts[2]).await {
                Some(info_dump) => {
                    info!(
                        "room {} {} created_ms={}",
                        info_dump.summary.room_id,
                        info_dump.summary.status.as_str(),
                        info_dump.summary.created_at_ms
                    );
                    for p in info_dump.participants {
                        info!(
                            "  {} ({:.1}, {:.1}) {} {:?} {}",
                            p.id,
                            p.x,
                            p.y,
                            p.direction.as_str(),
                            p.movement_state,
                            p.color
                        );
                    }
                }
                None => warn!("rooms info: room not found"),
            },
            "stats" => {
                let metrics = &state.room_manager.metrics;
                info!(
                    "rooms={} created={} closed={} registered={} left={}",
                    state.room_manager.current_rooms().await,
                    metrics.rooms_created_total.load(Ordering::Relaxed),
                    metrics.rooms_closed_total.load(Ordering::Relaxed),
                    metrics.participants_registered_total.load(Ordering::Relaxed),
                    metrics.participants_left_total.load(Ordering::Relaxed)
                );
            }
            _ => warn!("unknown rooms command"),
        }
    }
}

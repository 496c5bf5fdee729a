//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::RoomHandle;
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Work for the socket writer
enum Outbound {
    /// Direct reply to this session
    Direct(ServerMsg),
    /// Start forwarding a room's broadcasts
    Follow(broadcast::Receiver<ServerMsg>),
    /// Stop forwarding room broadcasts
    Unfollow,
}

/// The room broadcast a session is currently forwarding, if any
#[derive(Default)]
struct RoomFeed {
    rx: Option<broadcast::Receiver<ServerMsg>>,
}

impl RoomFeed {
    fn follow(&mut self, rx: broadcast::Receiver<ServerMsg>) {
        self.rx = Some(rx);
    }

    fn unfollow(&mut self) {
        self.rx = None;
    }

    /// Next room event, pending forever while not following
    async fn recv(&mut self) -> Result<ServerMsg, broadcast::error::RecvError> {
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let session_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, session_id: Uuid, state: AppState) {
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        session_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(64);
    let writer_handle = tokio::spawn(run_writer(session_id, ws_sink, out_rx));

    let room = run_reader(session_id, ws_stream, &state, out_tx).await;

    // Signal disconnect to the room
    if let Some(room) = room {
        if let Err(e) = room.leave(session_id).await {
            debug!(session_id = %session_id, error = %e, "Room already closed on disconnect");
        }
    }

    writer_handle.abort();

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> room. Returns the room joined last.
async fn run_reader(
    session_id: Uuid,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    out_tx: mpsc::Sender<Outbound>,
) -> Option<RoomHandle> {
    let rate_limiter = SessionRateLimiter::new(state.config.command_rate_limit);
    let mut room: Option<RoomHandle> = None;

    while let Some(result) = ws_stream.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        };

        if !rate_limiter.check_command() {
            warn!(session_id = %session_id, "Rate limited command");
            continue;
        }

        let msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                continue;
            }
        };

        let delivered = match msg {
            ClientMsg::JoinGame {
                game_key,
                player_name,
                team,
            } => {
                if let Some(previous) = room.take() {
                    if previous.key != game_key {
                        let _ = previous.leave(session_id).await;
                    }
                }

                let handle = state.rooms.get_or_create(&game_key);
                let _ = out_tx.send(Outbound::Follow(handle.subscribe())).await;
                match handle.join(session_id, player_name, team).await {
                    Ok(snapshot) => {
                        debug!(
                            session_id = %session_id,
                            game_key = %game_key,
                            players = snapshot.players.len(),
                            "Joined room"
                        );
                        room = Some(handle);
                        true
                    }
                    Err(e) => {
                        let _ = out_tx.send(Outbound::Unfollow).await;
                        let reply = ServerMsg::error("room_closed", e.to_string());
                        out_tx.send(Outbound::Direct(reply)).await.is_ok()
                    }
                }
            }
            ClientMsg::Move { from, to } => match &room {
                Some(handle) => handle.send_move(session_id, from, to).await.is_ok(),
                None => not_joined(&out_tx).await,
            },
            ClientMsg::TogglePause => match &room {
                Some(handle) => handle.toggle_pause().await.is_ok(),
                None => not_joined(&out_tx).await,
            },
            ClientMsg::Ping { t } => out_tx
                .send(Outbound::Direct(ServerMsg::Pong { t }))
                .await
                .is_ok(),
            ClientMsg::LeaveGame => {
                if let Some(handle) = room.take() {
                    let _ = handle.leave(session_id).await;
                }
                out_tx.send(Outbound::Unfollow).await.is_ok()
            }
        };

        if !delivered {
            debug!(session_id = %session_id, "Room or writer gone, closing session");
            break;
        }
    }

    room
}

async fn not_joined(out_tx: &mpsc::Sender<Outbound>) -> bool {
    let reply = ServerMsg::error("not_joined", "Join a game first");
    out_tx.send(Outbound::Direct(reply)).await.is_ok()
}

/// Writer task: direct replies and room broadcasts -> WebSocket
async fn run_writer(
    session_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
) {
    let mut feed = RoomFeed::default();

    loop {
        let msg = tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Direct(msg)) => msg,
                Some(Outbound::Follow(rx)) => {
                    feed.follow(rx);
                    continue;
                }
                Some(Outbound::Unfollow) => {
                    feed.unfollow();
                    continue;
                }
                None => break,
            },
            event = feed.recv() => match event {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(session_id = %session_id, lagged_count = n, "Client lagged, skipping {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(session_id = %session_id, "Room channel closed");
                    feed.unfollow();
                    continue;
                }
            },
        };

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

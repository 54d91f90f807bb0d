//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::physics::PaddleInput;
use crate::game::room::RoomId;
use crate::game::RoomError;
use crate::http::middleware::{verify_jwt, JwtClaims};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, RematchAnswer, ServerMsg};

const OUTBOUND_CAPACITY: usize = 256;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            info!(user_id = %claims.sub, "WebSocket upgrade for authenticated user");
            ws.on_upgrade(move |socket| handle_socket(socket, claims, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, claims: JwtClaims, state: AppState) {
    let user_id = claims.sub;
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_CAPACITY);

    // Writer task: everything bound for this client goes through one channel
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let _ = out_tx
        .send(ServerMsg::Welcome {
            user_id,
            server_time: unix_millis(),
        })
        .await;

    let lobby_handle = forward(user_id, state.rooms.subscribe_lobby(), out_tx.clone(), None);

    let rate_limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    let mut session = Session::new(user_id, claims.display_name(), state, out_tx);

    // Reader loop: WebSocket -> room actions
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(user_id = %user_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => session.handle(client_msg).await,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        session
                            .send(ServerMsg::Error {
                                code: "bad_request".to_string(),
                                message: "Malformed message".to_string(),
                            })
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // A dropped connection counts as leaving
    session.leave_current();

    lobby_handle.abort();
    writer_handle.abort();

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Per-connection state: who is talking and which room they are in
struct Session {
    user_id: Uuid,
    name: String,
    state: AppState,
    out: mpsc::Sender<ServerMsg>,
    current: Option<(RoomId, JoinHandle<()>)>,
}

impl Session {
    fn new(user_id: Uuid, name: String, state: AppState, out: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            user_id,
            name,
            state,
            out,
            current: None,
        }
    }

    async fn send(&self, msg: ServerMsg) {
        let _ = self.out.send(msg).await;
    }

    /// Run one client message; rejections go back to this client only
    async fn handle(&mut self, msg: ClientMsg) {
        if let Err(err) = self.dispatch(msg).await {
            debug!(user_id = %self.user_id, code = err.code(), error = %err, "Action rejected");
            self.send(ServerMsg::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            })
            .await;
        }
    }

    async fn dispatch(&mut self, msg: ClientMsg) -> Result<(), RoomError> {
        let rooms = self.state.rooms.clone();
        let user_id = self.user_id;

        match msg {
            ClientMsg::JoinRoom { room_id } => {
                // Keep the old room until the new one has accepted us
                let switching = self.current_room().is_some_and(|current| current != room_id);
                let joined = rooms.join(room_id, user_id, self.name.clone())?;
                if switching {
                    self.leave_current();
                }
                self.send(joined.init).await;

                let forwarder = forward(user_id, joined.events, self.out.clone(), Some(room_id));
                if let Some((_, previous)) = self.current.replace((room_id, forwarder)) {
                    previous.abort();
                }
                Ok(())
            }
            ClientMsg::PaddleMove {
                room_id,
                y,
                direction,
            } => {
                let input = match (y, direction) {
                    (Some(y), _) => PaddleInput::Pointer(y),
                    (None, Some(direction)) => PaddleInput::Step(direction),
                    (None, None) => return Err(RoomError::invalid_state("Missing y or direction")),
                };
                rooms.paddle_move(room_id, user_id, input)
            }
            ClientMsg::StartGame { room_id } => rooms.start_game(room_id, user_id),
            ClientMsg::RematchRequest { room_id } => rooms.rematch_request(room_id, user_id),
            ClientMsg::RematchResponse { room_id, response } => {
                rooms.rematch_response(room_id, user_id, response == RematchAnswer::Accept)
            }
            ClientMsg::DissolveRoom { room_id } => {
                rooms.dissolve(room_id, user_id)?;
                // The forwarder delivers room_dissolved and then stops on its own
                if self.current_room() == Some(room_id) {
                    self.current = None;
                }
                Ok(())
            }
            ClientMsg::LeaveRoom { room_id } => {
                rooms.leave(room_id, user_id)?;
                if self.current_room() == Some(room_id) {
                    self.stop_forwarding();
                }
                Ok(())
            }
            ClientMsg::Ping { t } => {
                self.send(ServerMsg::Pong { t }).await;
                Ok(())
            }
        }
    }

    fn current_room(&self) -> Option<RoomId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    fn stop_forwarding(&mut self) {
        if let Some((_, forwarder)) = self.current.take() {
            forwarder.abort();
        }
    }

    /// Leave whatever room this connection is in; a room that is already
    /// gone is not an error here
    fn leave_current(&mut self) {
        let Some(room_id) = self.current_room() else {
            return;
        };
        self.stop_forwarding();
        if let Err(err) = self.state.rooms.leave(room_id, self.user_id) {
            debug!(user_id = %self.user_id, room_id = %room_id, error = %err, "Leave on exit skipped");
        }
    }
}

/// Forward a broadcast channel into this client's outbound queue.
/// A room forwarder stops after relaying its room's dissolution.
fn forward(
    user_id: Uuid,
    mut events: broadcast::Receiver<ServerMsg>,
    out: mpsc::Sender<ServerMsg>,
    room: Option<RoomId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(msg) => {
                    let dissolved = matches!(
                        (&msg, room),
                        (ServerMsg::RoomDissolved { room_id }, Some(current)) if *room_id == current
                    );
                    if out.send(msg).await.is_err() || dissolved {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping {} events", n);
                    // Continue - don't disconnect for lag
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::physics::Direction;
    use crate::game::room::GameMode;

    fn session(state: &AppState) -> (Session, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(64);
        let user_id = Uuid::new_v4();
        (Session::new(user_id, "tester".into(), state.clone(), tx), rx)
    }

    fn kind(msg: &ServerMsg) -> String {
        serde_json::to_value(msg).unwrap()["type"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let state = AppState::new(Config::for_tests("k"));
        let (mut session, mut rx) = session(&state);
        session.handle(ClientMsg::Ping { t: 42 }).await;
        assert!(matches!(rx.recv().await, Some(ServerMsg::Pong { t: 42 })));
    }

    #[tokio::test]
    async fn join_sends_init_then_room_events() {
        let state = AppState::new(Config::for_tests("k"));
        let (mut session, mut rx) = session(&state);
        let room_id = Uuid::new_v4();
        state.rooms.create(room_id, GameMode::Bot, 3, session.user_id).unwrap();

        session.handle(ClientMsg::JoinRoom { room_id }).await;
        assert_eq!(kind(&rx.recv().await.unwrap()), "init");
        assert_eq!(kind(&rx.recv().await.unwrap()), "players_update");
        assert_eq!(session.current_room(), Some(room_id));

        session
            .handle(ClientMsg::PaddleMove {
                room_id,
                y: None,
                direction: Some(Direction::Up),
            })
            .await;
        match rx.recv().await.unwrap() {
            ServerMsg::PaddleUpdate { y, .. } => assert_eq!(y, 225.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejections_carry_reason_code() {
        let state = AppState::new(Config::for_tests("k"));
        let (mut session, mut rx) = session(&state);

        session.handle(ClientMsg::JoinRoom { room_id: Uuid::new_v4() }).await;
        match rx.recv().await.unwrap() {
            ServerMsg::Error { code, .. } => assert_eq!(code, "not_found"),
            other => panic!("unexpected {:?}", other),
        }

        session
            .handle(ClientMsg::PaddleMove {
                room_id: Uuid::new_v4(),
                y: None,
                direction: None,
            })
            .await;
        match rx.recv().await.unwrap() {
            ServerMsg::Error { code, .. } => assert_eq!(code, "invalid_state"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn leaving_on_exit_dissolves_empty_room() {
        let state = AppState::new(Config::for_tests("k"));
        let (mut session, _rx) = session(&state);
        let room_id = Uuid::new_v4();
        state.rooms.create(room_id, GameMode::Pvp, 5, session.user_id).unwrap();
        session.handle(ClientMsg::JoinRoom { room_id }).await;

        session.leave_current();
        assert!(session.current_room().is_none());
        assert_eq!(state.rooms.get(room_id).err(), Some(RoomError::NotFound));
    }

    #[tokio::test]
    async fn failed_join_keeps_current_room() {
        let state = AppState::new(Config::for_tests("k"));
        let (mut session, mut rx) = session(&state);
        let home = Uuid::new_v4();
        let full = Uuid::new_v4();
        state.rooms.create(home, GameMode::Pvp, 5, session.user_id).unwrap();
        state.rooms.create(full, GameMode::Bot, 5, Uuid::new_v4()).unwrap();
        state.rooms.join(full, Uuid::new_v4(), "bot-player".into()).unwrap();
        session.handle(ClientMsg::JoinRoom { room_id: home }).await;

        session.handle(ClientMsg::JoinRoom { room_id: full }).await;
        session.handle(ClientMsg::JoinRoom { room_id: Uuid::new_v4() }).await;

        let mut codes = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMsg::Error { code, .. } = msg {
                codes.push(code);
            }
        }
        assert_eq!(codes, vec!["room_full", "not_found"]);
        assert_eq!(session.current_room(), Some(home));
        assert_eq!(state.rooms.summary(home).unwrap().players, 1);
    }

    #[tokio::test]
    async fn switching_rooms_leaves_the_old_one() {
        let state = AppState::new(Config::for_tests("k"));
        let (mut session, _rx) = session(&state);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let other = Uuid::new_v4();
        state.rooms.create(first, GameMode::Pvp, 5, other).unwrap();
        state.rooms.create(second, GameMode::Pvp, 5, other).unwrap();
        state.rooms.join(first, other, "other".into()).unwrap();

        session.handle(ClientMsg::JoinRoom { room_id: first }).await;
        session.handle(ClientMsg::JoinRoom { room_id: second }).await;

        assert_eq!(session.current_room(), Some(second));
        assert_eq!(state.rooms.summary(first).unwrap().players, 1);
        assert_eq!(state.rooms.summary(second).unwrap().players, 1);
    }
}

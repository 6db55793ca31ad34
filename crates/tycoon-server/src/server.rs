//! WebSocket server and connection handling.

use crate::engine::{Actor, Broadcaster, DispatchError, Engine, Outcome};
use crate::protocol::{ClientMessage, GameSummary, ServerMessage};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use tycoon_core::{ActionEnvelope, GameAction, GameState};
use uuid::Uuid;

/// Open connections and the games they watch.
#[derive(Default)]
pub struct Hub {
    /// Mapping from connection ID to its message sender
    connections: DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
    /// Mapping from game code to subscribed connections
    subscribers: DashMap<String, HashSet<Uuid>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.connections.insert(connection_id, sender);
    }

    /// Forget a connection and all of its subscriptions.
    pub fn disconnect(&self, connection_id: Uuid) {
        self.connections.remove(&connection_id);
        for mut watchers in self.subscribers.iter_mut() {
            watchers.remove(&connection_id);
        }
        self.subscribers.retain(|_, watchers| !watchers.is_empty());
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, connection_id: Uuid, msg: ServerMessage) {
        if let Some(sender) = self.connections.get(&connection_id) {
            let _ = sender.send(msg);
        }
    }

    pub fn subscribe(&self, code: &str, connection_id: Uuid) {
        self.subscribers
            .entry(code.to_string())
            .or_default()
            .insert(connection_id);
    }

    pub fn unsubscribe(&self, code: &str, connection_id: Uuid) {
        if let Some(mut watchers) = self.subscribers.get_mut(code) {
            watchers.remove(&connection_id);
        }
    }

    /// Broadcast a message to everyone watching a game.
    pub fn broadcast(&self, code: &str, msg: ServerMessage) {
        let watchers: Vec<Uuid> = match self.subscribers.get(code) {
            Some(watchers) => watchers.iter().copied().collect(),
            None => return,
        };
        for connection_id in watchers {
            self.send_to(connection_id, msg.clone());
        }
    }

    pub fn subscriber_count(&self, code: &str) -> usize {
        self.subscribers.get(code).map_or(0, |w| w.len())
    }
}

impl Broadcaster for Hub {
    fn publish(&self, game: &GameState) {
        if self.subscriber_count(&game.code) > 0 {
            self.broadcast(&game.code, ServerMessage::snapshot(game));
        }
    }

    fn close(&self, code: &str) {
        self.broadcast(
            code,
            ServerMessage::GameDeleted {
                code: code.to_string(),
            },
        );
        self.subscribers.remove(code);
    }
}

/// Server state shared across all connections.
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub hub: Arc<Hub>,
}

impl ServerState {
    pub fn new(engine: Arc<Engine>, hub: Arc<Hub>) -> Self {
        Self { engine, hub }
    }
}

/// Per-connection identity
struct Connection {
    id: Uuid,
    actor: Option<Actor>,
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Tycoon server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let mut conn = Connection {
        id: Uuid::new_v4(),
        actor: None,
    };

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.hub.connect(conn.id, tx);

    let welcome = ServerMessage::Welcome {
        connection_id: conn.id,
    };
    ws_sender.send(Message::Text(serde_json::to_string(&welcome)?)).await?;

    // Forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_message(&mut conn, client_msg, &state).await,
                Err(e) => {
                    warn!("Invalid message from {}: {}", conn.id, e);
                    state.hub.send_to(conn.id, ServerMessage::error("Malformed message"));
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", conn.id);
                break;
            }
            Ok(Message::Ping(_)) => {
                state.hub.send_to(conn.id, ServerMessage::Pong);
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", conn.id, e);
                break;
            }
            _ => {}
        }
    }

    state.hub.disconnect(conn.id);
    send_task.abort();

    info!("Connection closed for {}", conn.id);
    Ok(())
}

/// Handle a client message.
async fn handle_message(conn: &mut Connection, msg: ClientMessage, state: &ServerState) {
    match msg {
        ClientMessage::Hello { user_id, name } => {
            debug!(connection = %conn.id, user = %user_id, "Hello");
            conn.actor = Some(Actor::new(user_id, name));
        }
        ClientMessage::Ping => state.hub.send_to(conn.id, ServerMessage::Pong),
        request => match conn.actor.clone() {
            Some(actor) => handle_request(conn.id, &actor, request, state).await,
            None => state.hub.send_to(conn.id, ServerMessage::error("Say Hello first")),
        },
    }
}

/// Handle a message from an identified connection.
async fn handle_request(connection_id: Uuid, actor: &Actor, msg: ClientMessage, state: &ServerState) {
    let hub = &state.hub;
    let engine = &state.engine;

    match msg {
        ClientMessage::CreateGame => match engine.create_game(actor).await {
            Ok(game) => {
                hub.subscribe(&game.code, connection_id);
                hub.send_to(
                    connection_id,
                    ServerMessage::GameCreated {
                        code: game.code.clone(),
                    },
                );
                hub.send_to(connection_id, ServerMessage::snapshot(&game));
            }
            Err(e) => hub.send_to(connection_id, ServerMessage::error(e)),
        },

        ClientMessage::JoinGame { code } => {
            if engine.registry().get(&code).is_none() {
                hub.send_to(connection_id, ServerMessage::error(DispatchError::SessionNotFound(code)));
                return;
            }
            hub.subscribe(&code, connection_id);
            let outcome = engine.dispatch(&code, actor, GameAction::JoinGame).await;
            if matches!(outcome, Ok(Outcome::Ignored)) {
                send_snapshot(connection_id, &code, state).await;
            }
            reply(connection_id, &code, "JOIN_GAME", outcome, state);
        }

        ClientMessage::Subscribe { code } => {
            if engine.registry().get(&code).is_some() {
                hub.subscribe(&code, connection_id);
                send_snapshot(connection_id, &code, state).await;
            } else {
                hub.send_to(connection_id, ServerMessage::error(DispatchError::SessionNotFound(code)));
            }
        }

        ClientMessage::Unsubscribe { code } => hub.unsubscribe(&code, connection_id),

        ClientMessage::ListGames => {
            let games = engine
                .registry()
                .list_by_user(&actor.user_id)
                .await
                .iter()
                .map(GameSummary::from)
                .collect();
            hub.send_to(connection_id, ServerMessage::GameList { games });
        }

        ClientMessage::DeleteGame { code } => {
            if let Err(e) = engine.delete_game(&code, &actor.user_id).await {
                hub.send_to(connection_id, ServerMessage::error(e));
            }
        }

        ClientMessage::Action { code, action, payload } => {
            let envelope = ActionEnvelope { action, payload };
            let outcome = engine.dispatch_envelope(&code, actor, &envelope).await;
            reply(connection_id, &code, &envelope.action, outcome, state);
        }

        ClientMessage::Hello { .. } | ClientMessage::Ping => {}
    }
}

async fn send_snapshot(connection_id: Uuid, code: &str, state: &ServerState) {
    if let Some(shared) = state.engine.registry().get(code) {
        let msg = ServerMessage::snapshot(&*shared.read().await);
        state.hub.send_to(connection_id, msg);
    }
}

/// Tell the acting connection how its action went; the snapshot itself
/// reaches it through the broadcast.
fn reply(connection_id: Uuid, code: &str, action: &str, outcome: Result<Outcome, DispatchError>, state: &ServerState) {
    let msg = match outcome {
        Ok(Outcome::Applied { version, events }) => ServerMessage::ActionResult {
            code: code.to_string(),
            action: action.to_string(),
            version,
            events,
        },
        Ok(Outcome::Rejected(error)) => ServerMessage::ActionRejected {
            code: code.to_string(),
            action: action.to_string(),
            message: error.to_string(),
            error,
        },
        Ok(Outcome::Ignored) => return,
        Err(e) => ServerMessage::error(e),
    };
    state.hub.send_to(connection_id, msg);
}

//! WebSocket handler for live generation progress

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::generator::GenerationRequest;
use crate::workflow::GenerationResult;

/// Pending events per connection before new ones are dropped
const EVENT_BUFFER: usize = 32;

/// A connected client session
#[derive(Debug)]
pub struct Session {
    client_id: String,
    connection_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
}

impl Session {
    pub fn new(client_id: impl Into<String>, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            client_id: client_id.into(),
            connection_id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Identifies this particular connection among sessions sharing a client id
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Drop the push channel; the connection's writer sees the end of stream
    fn close(self) {
        debug!(
            "Closing channel for {} (connection {})",
            self.client_id, self.connection_id
        );
        drop(self.sender);
    }
}

/// Registry of live sessions keyed by client id
///
/// Delivery is best effort and at most once: events for unknown clients or
/// full/closed channels are dropped.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, closing any previous session under the same id
    pub async fn register(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.remove(&session.client_id) {
            info!("Replacing existing session for {}", session.client_id);
            previous.close();
        }
        sessions.insert(session.client_id.clone(), session);
    }

    /// Remove a session
    pub async fn unregister(&self, client_id: &str) {
        if let Some(session) = self.sessions.write().await.remove(client_id) {
            session.close();
        }
    }

    /// Remove a session only if it still belongs to `connection_id`
    ///
    /// Returns false when the id was taken over by a newer connection.
    pub async fn release(&self, client_id: &str, connection_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(client_id) {
            Some(session) if session.connection_id == connection_id => {
                if let Some(session) = sessions.remove(client_id) {
                    session.close();
                }
                true
            }
            _ => false,
        }
    }

    /// Push an event to a client without waiting
    pub async fn send(&self, client_id: &str, event: ServerEvent) {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(client_id) else {
            debug!("No session for {}, dropping {:?}", client_id, event);
            return;
        };
        if let Err(e) = session.sender.try_send(event) {
            warn!("Failed to send event to client {}: {}", client_id, e);
        }
    }

    /// Check if a client id has a live session
    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.sessions.read().await.contains_key(client_id)
    }

    /// Number of live sessions
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Progress events pushed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Generation started
    Processing { message: String },
    /// Generation done, upload started
    Saving { message: String },
    /// Image stored
    Completed {
        image_id: String,
        image_url: String,
        blob_url: String,
        message: String,
    },
    /// The cycle failed
    Error { message: String },
}

impl ServerEvent {
    pub fn processing() -> Self {
        ServerEvent::Processing {
            message: "Generating image...".to_string(),
        }
    }

    pub fn saving() -> Self {
        ServerEvent::Saving {
            message: "Saving image...".to_string(),
        }
    }

    pub fn completed(result: &GenerationResult) -> Self {
        ServerEvent::Completed {
            image_id: result.image_id.clone(),
            image_url: result.image_url.clone(),
            blob_url: result.blob_url.clone(),
            message: "Image generation complete".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Completed or error: ends one generation cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerEvent::Completed { .. } | ServerEvent::Error { .. })
    }
}

/// Messages sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a generation cycle
    Generate(GenerationRequest),
    /// Keep the connection alive
    Ping,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER);
    let session = Session::new(client_id.clone(), tx);
    let connection_id = session.connection_id();

    state.connections.register(session).await;
    info!("Client {} connected", client_id);

    let (mut sink, mut stream) = socket.split();

    // Forward events until the registry drops our sender or the socket dies
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Generate requests on one connection run one at a time, in arrival order
    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(&state, &client_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", client_id, e);
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    // Clean up
    state.connections.release(&client_id, connection_id).await;
    writer.abort();
    info!("Client {} disconnected", client_id);
}

/// Handle a text frame from the client
async fn handle_client_text(state: &AppState, client_id: &str, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Generate(request)) => {
            info!("Client {} requested generation", client_id);
            if let Err(e) = state.workflow.run_streaming(client_id, &request).await {
                warn!("Generation for {} failed: {}", client_id, e);
            }
        }
        Ok(ClientMessage::Ping) => {}
        Err(e) => {
            state
                .connections
                .send(client_id, ServerEvent::error(format!("invalid message: {}", e)))
                .await;
        }
    }
}

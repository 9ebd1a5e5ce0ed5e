//! Realtime Queue Broadcasting
//!
//! WebSocket endpoint and the room broadcaster behind it.
//!
//! ## Architecture
//!
//! - Each connection gets a bounded `mpsc` buffer; the socket task drains it
//! - Connections join at most one doctor room (`doctor:<id>`) at a time
//! - Publishing uses `try_send` and never waits on a slow client
//! - A full buffer drops the event for that client and later tells it so
//!   with a `Lagged` error message; clients recover with `reconnect-queue`

use crate::auth::{authenticate, authenticate_token, AuthConfig, AuthContext};
use crate::error::{ApiError, ApiResult};
use crate::events::{room_name, ClientMessage, ControlMessage, QueueAction, QueueEvent};
use crate::services::{QueueEngine, QueuePublisher};
use crate::telemetry::QueueMetrics;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use clinic_core::{parse_entity_id, DoctorId};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Identifier of one live WebSocket connection.
pub type ConnectionId = u64;

// ============================================================================
// BROADCASTER
// ============================================================================

/// Why a room join was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Invalid doctor ID")]
    InvalidDoctorId,

    #[error("Not allowed to join this doctor room")]
    Forbidden,

    #[error("Connection is not registered")]
    UnknownConnection,
}

struct Connection {
    tx: mpsc::Sender<String>,
    auth: AuthContext,
    room: Option<DoctorId>,
    lagged: Arc<AtomicU64>,
}

/// Receiving side handed to the socket task on connect.
pub struct Subscription {
    pub id: ConnectionId,
    pub rx: mpsc::Receiver<String>,
    /// Events dropped since the client was last told.
    pub lagged: Arc<AtomicU64>,
}

/// Fans queue events out to the connections in each doctor's room.
pub struct Broadcaster {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<DoctorId, HashSet<ConnectionId>>,
    next_id: AtomicU64,
    buffer: usize,
    metrics: Arc<QueueMetrics>,
}

impl Broadcaster {
    /// `buffer` is the per-connection queue depth.
    pub fn new(buffer: usize, metrics: Arc<QueueMetrics>) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            metrics,
        }
    }

    /// Register an authenticated connection. It belongs to no room yet.
    pub fn connect(&self, auth: AuthContext) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        let lagged = Arc::new(AtomicU64::new(0));

        self.connections.insert(
            id,
            Connection {
                tx,
                auth,
                room: None,
                lagged: lagged.clone(),
            },
        );
        self.metrics.ws_connected();
        debug!(connection_id = id, user_id = %auth.user_id, "Connection registered");

        Subscription { id, rx, lagged }
    }

    /// Admit a connection to a doctor's room, leaving its previous room.
    pub fn subscribe(&self, id: ConnectionId, raw_doctor_id: &str) -> Result<DoctorId, RoomError> {
        let doctor_id = parse_entity_id(raw_doctor_id).ok_or(RoomError::InvalidDoctorId)?;
        self.join(id, doctor_id)?;
        Ok(doctor_id)
    }

    /// Admit a connection to a doctor's room by parsed id.
    pub fn join(&self, id: ConnectionId, doctor_id: DoctorId) -> Result<(), RoomError> {
        let previous = {
            let mut conn = self
                .connections
                .get_mut(&id)
                .ok_or(RoomError::UnknownConnection)?;
            if !conn.auth.can_view_doctor(doctor_id) {
                warn!(
                    connection_id = id,
                    user_id = %conn.auth.user_id,
                    room = %room_name(doctor_id),
                    "Room join refused"
                );
                return Err(RoomError::Forbidden);
            }
            conn.room.replace(doctor_id)
        };

        if let Some(old) = previous {
            self.remove_member(old, id);
        }
        self.rooms.entry(doctor_id).or_default().insert(id);

        info!(connection_id = id, room = %room_name(doctor_id), "Joined doctor room");
        Ok(())
    }

    /// Forget a connection entirely.
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(&id) {
            if let Some(room) = conn.room {
                self.remove_member(room, id);
            }
            self.metrics.ws_disconnected();
            debug!(connection_id = id, "Connection removed");
        }
    }

    /// Queue a message for one connection.
    pub fn send_to<T: Serialize>(&self, id: ConnectionId, message: &T) -> bool {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize message");
                return false;
            }
        };
        let Some(tx) = self.connections.get(&id).map(|conn| conn.tx.clone()) else {
            return false;
        };
        match tx.try_send(json) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.note_dropped(id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.disconnect(id);
                false
            }
        }
    }

    /// Room the connection currently belongs to.
    pub fn room_of(&self, id: ConnectionId) -> Option<DoctorId> {
        self.connections.get(&id).and_then(|conn| conn.room)
    }

    pub fn room_size(&self, doctor_id: DoctorId) -> usize {
        self.rooms.get(&doctor_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn remove_member(&self, doctor_id: DoctorId, id: ConnectionId) {
        let now_empty = match self.rooms.get_mut(&doctor_id) {
            Some(mut members) => {
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(&doctor_id, |_, members| members.is_empty());
        }
    }

    fn note_dropped(&self, id: ConnectionId) {
        if let Some(conn) = self.connections.get(&id) {
            conn.lagged.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.record_delivery("dropped");
        warn!(connection_id = id, "Client buffer full, event dropped");
    }
}

impl QueuePublisher for Broadcaster {
    fn publish(&self, event: &QueueEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, event = event.event_type(), "Failed to serialize event");
                return;
            }
        };

        let members: Vec<ConnectionId> = match self.rooms.get(&event.doctor_id) {
            Some(members) => members.iter().copied().collect(),
            None => {
                debug!(
                    room = %room_name(event.doctor_id),
                    event = event.event_type(),
                    "No subscribers for event"
                );
                return;
            }
        };

        let mut closed = Vec::new();
        for id in &members {
            let Some(tx) = self.connections.get(id).map(|conn| conn.tx.clone()) else {
                closed.push(*id);
                continue;
            };
            match tx.try_send(json.clone()) {
                Ok(()) => self.metrics.record_delivery("delivered"),
                Err(TrySendError::Full(_)) => self.note_dropped(*id),
                Err(TrySendError::Closed(_)) => {
                    self.metrics.record_delivery("closed");
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            debug!(connection_id = id, "Evicting closed connection");
            self.disconnect(id);
            self.remove_member(event.doctor_id, id);
        }

        debug!(
            room = %room_name(event.doctor_id),
            event = event.event_type(),
            receivers = members.len(),
            "Broadcast event"
        );
    }
}

// ============================================================================
// WEBSOCKET ENDPOINT
// ============================================================================

/// State for the WebSocket route.
#[derive(Clone)]
pub struct WsState {
    pub broadcaster: Arc<Broadcaster>,
    pub engine: QueueEngine,
    pub auth_config: Arc<AuthConfig>,
}

/// Browser clients cannot set headers on a WebSocket handshake.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// ## Protocol
///
/// 1. Client connects with `Authorization: Bearer <jwt>` or `?token=<jwt>`
/// 2. Server validates the token; failure is a plain 401, no upgrade
/// 3. Client sends `{"event":"join-doctor-room","doctorId":"<uuid>"}`
/// 4. Server replies `room-joined` and streams that room's queue events
/// 5. `reconnect-queue` does the same and also pushes a fresh snapshot
///
/// ```text
/// GET /clinic-crm-api/ws?token=<jwt>
/// Upgrade: websocket
/// ```
pub async fn ws_handler(
    State(state): State<Arc<WsState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let auth = match query.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => authenticate_token(&state.auth_config, token)?,
        None => authenticate(
            &state.auth_config,
            headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()),
        )?,
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    info!(user_id = %auth.user_id, role = %auth.role, "WebSocket connection request");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, auth)))
}

/// Runs for the lifetime of one WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<WsState>, auth: AuthContext) {
    let Subscription {
        id,
        mut rx,
        lagged,
    } = state.broadcaster.connect(auth);
    info!(connection_id = id, user_id = %auth.user_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    handle_client_message(&recv_state, id, &text).await;
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = id, "Client sent close frame");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Binary(data)) => {
                    debug!(connection_id = id, len = data.len(), "Binary message ignored");
                }
                Err(e) => {
                    warn!(connection_id = id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(json) = outgoing else {
                    debug!(connection_id = id, "Connection evicted by broadcaster");
                    break;
                };
                if let Err(e) = sender.send(Message::Text(json)).await {
                    error!(connection_id = id, error = %e, "Failed to send event, closing connection");
                    break;
                }

                let skipped = lagged.swap(0, Ordering::Relaxed);
                if skipped > 0 {
                    warn!(connection_id = id, skipped = skipped, "Client lagged, some events were dropped");
                    let notice = ControlMessage::error(format!("Lagged: {} events dropped", skipped));
                    if let Err(e) = send_message(&mut sender, &notice).await {
                        error!(connection_id = id, error = %e, "Failed to send lag notice");
                        break;
                    }
                }
            }

            _ = &mut recv_task => {
                debug!(connection_id = id, "Receiver task finished");
                break;
            }
        }
    }

    recv_task.abort();
    state.broadcaster.disconnect(id);
    info!(connection_id = id, "WebSocket disconnected");
}

async fn handle_client_message(state: &WsState, id: ConnectionId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id = id, error = %e, "Malformed client message");
            state
                .broadcaster
                .send_to(id, &ControlMessage::error("Invalid message"));
            return;
        }
    };

    let doctor_id = match state.broadcaster.subscribe(id, message.doctor_id()) {
        Ok(doctor_id) => doctor_id,
        Err(e) => {
            state
                .broadcaster
                .send_to(id, &ControlMessage::error(e.to_string()));
            return;
        }
    };
    state
        .broadcaster
        .send_to(id, &ControlMessage::room_joined(doctor_id));

    if message.wants_resync() {
        match state.engine.list_active(doctor_id).await {
            Ok(queue) => {
                let snapshot = QueueEvent::updated(doctor_id, queue, QueueAction::Resync);
                state.broadcaster.send_to(id, &snapshot);
            }
            Err(e) => {
                warn!(connection_id = id, doctor_id = %doctor_id, error = %e, "Resync snapshot failed");
                let message = ApiError::from(e).message;
                state.broadcaster.send_to(id, &ControlMessage::error(message));
            }
        }
    }
}

async fn send_message<T: Serialize>(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &T,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(|e| {
        error!(error = %e, "Failed to serialize message");
        axum::Error::new(e)
    })?;

    sender.send(Message::Text(json)).await
}

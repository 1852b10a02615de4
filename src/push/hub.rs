//! Broadcast hub — the in-process fan-out behind the Push Bus
//!
//! One broadcast channel carries every frame; each connected socket
//! filters on its own room set. Losing a subscriber never affects the
//! sender, and a lagged subscriber skips frames rather than stalling the
//! engine (at-most-once, no replay).

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::auth::{Claims, Role, SubjectKind};
use crate::config::defaults::PUSH_CHANNEL_CAPACITY;

use super::{rooms, PushBus};

/// One room-addressed event in flight.
#[derive(Debug, Clone)]
pub struct PushFrame {
    pub room: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Broadcast-channel implementation of the Push Bus.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<PushFrame>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// New receiver for a connecting socket.
    pub fn subscribe(&self) -> broadcast::Receiver<PushFrame> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PushBus for BroadcastHub {
    fn emit(&self, room: &str, event: &str, payload: serde_json::Value) {
        let frame = PushFrame {
            room: room.to_string(),
            event: event.to_string(),
            payload,
        };
        match self.tx.send(frame) {
            Ok(subscribers) => {
                trace!(room, event, subscribers, "push frame emitted");
            }
            Err(_) => {
                // No subscriber at all — frames to empty rooms drop
                // silently; the store remains the system of record.
                trace!(room, event, "push frame dropped (no subscribers)");
            }
        }
    }
}

/// Rooms a verified subject joins at connect time.
pub fn rooms_for(claims: &Claims) -> Vec<String> {
    let mut joined = vec![rooms::GLOBAL.to_string()];
    if claims.role == Role::Volunteer && claims.kind == SubjectKind::Volunteer {
        joined.push(rooms::volunteer(&claims.sub));
    }
    if claims.role == Role::Admin {
        joined.push(rooms::ADMINS.to_string());
    }
    joined
}

/// Pump broadcast frames to one connected socket until either side
/// closes. Frames outside the subject's rooms are filtered here; a
/// lagged receiver drops the missed frames and continues.
pub async fn serve_socket(
    mut socket: WebSocket,
    joined_rooms: Vec<String>,
    mut rx: broadcast::Receiver<PushFrame>,
) {
    debug!(rooms = ?joined_rooms, "push subscriber connected");
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Ok(frame) => {
                    if !joined_rooms.iter().any(|r| r == &frame.room) {
                        continue;
                    }
                    let text = serde_json::json!({
                        "event": frame.event,
                        "data": frame.payload,
                    })
                    .to_string();
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push subscriber lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Client frames are ignored; the socket is send-only.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("push subscriber disconnected");
}

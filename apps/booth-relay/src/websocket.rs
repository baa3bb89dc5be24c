use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use booth_channel::hub::Dispatch;
use booth_proto::{ClientEvent, Role, ServerEvent};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Error)]
enum HandshakeError {
    #[error("handshake timed out")]
    TimedOut,
    #[error("client closed socket before handshake")]
    SocketClosed,
    #[error("socket closed during handshake: {0:?}")]
    Closed(Option<String>),
    #[error("client sent invalid payload: {0}")]
    InvalidPayload(String),
    #[error("expected join, got {0}")]
    UnexpectedEvent(&'static str),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HandshakeError {
    fn metric_label(&self) -> &'static str {
        match self {
            HandshakeError::TimedOut => "timeout",
            HandshakeError::SocketClosed => "socket_closed",
            HandshakeError::Closed(_) => "client_closed",
            HandshakeError::InvalidPayload(_) => "invalid_payload",
            HandshakeError::UnexpectedEvent(_) => "unexpected_event",
            HandshakeError::Protocol(_) => "protocol_error",
        }
    }
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let handshake_timeout = state.hub.config().handshake_timeout;
    let (session_id, role) = match perform_handshake(handshake_timeout, &mut ws_rx).await {
        Ok(join) => join,
        Err(err) => {
            counter!(
                "booth_relay_handshakes_failure_total",
                1,
                "reason" => err.metric_label()
            );
            warn!(error = %err, "relay handshake failed");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let attachment = match state.hub.attach(&session_id, role) {
        Ok(attachment) => attachment,
        Err(err) => {
            counter!(
                "booth_relay_joins_rejected_total",
                1,
                "reason" => err.metric_label()
            );
            info!(session_id = %session_id, role = %role, reason = %err, "join rejected");
            let _ = send_event(
                &mut ws_tx,
                &ServerEvent::JoinRejected {
                    reason: err.to_string(),
                },
            )
            .await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let connection_id = attachment.connection_id;
    counter!("booth_relay_connections_total", 1, "role" => role.to_string());

    let joined = ServerEvent::Joined {
        session_id: session_id.clone(),
        role,
    };
    if send_event(&mut ws_tx, &joined).await.is_err() {
        state.hub.detach(&session_id, role, connection_id);
        return;
    }
    info!(session_id = %session_id, role = %role, connection_id = %connection_id, "relay connection established");

    let mut receiver = attachment.receiver;
    let mut writer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if send_event(&mut ws_tx, &event).await.is_err() {
                return;
            }
        }
        // Session retired by the hub.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => record_dispatch(&state, &session_id, role, connection_id, event),
                    Err(err) => debug!(session_id = %session_id, error = %err, "ignoring malformed frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(
                        session_id = %session_id,
                        role = %role,
                        reason = ?frame.map(|f| f.reason.to_string()),
                        "client closed websocket"
                    );
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(session_id = %session_id, role = %role, error = %err, "error receiving message");
                    break;
                }
                None => break,
            },
            _ = &mut writer => break,
        }
    }

    state.hub.detach(&session_id, role, connection_id);
    gauge!("booth_relay_sessions_active", state.hub.session_count() as f64);
    writer.abort();
    info!(session_id = %session_id, role = %role, "relay connection closed");
}

async fn perform_handshake(
    handshake_timeout: Duration,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<(String, Role), HandshakeError> {
    let first = timeout(handshake_timeout, ws_rx.next())
        .await
        .map_err(|_| HandshakeError::TimedOut)?
        .ok_or(HandshakeError::SocketClosed)?
        .map_err(|err| HandshakeError::Protocol(err.to_string()))?;

    let event = match first {
        Message::Text(text) => serde_json::from_str::<ClientEvent>(&text)
            .map_err(|err| HandshakeError::InvalidPayload(err.to_string()))?,
        Message::Binary(bytes) => serde_json::from_slice::<ClientEvent>(&bytes)
            .map_err(|err| HandshakeError::InvalidPayload(err.to_string()))?,
        Message::Close(frame) => {
            return Err(HandshakeError::Closed(frame.map(|f| f.reason.to_string())))
        }
        _ => return Err(HandshakeError::UnexpectedEvent("control frame")),
    };

    match event {
        ClientEvent::Join { session_id, role } => Ok((session_id, role)),
        other => Err(HandshakeError::UnexpectedEvent(other.kind())),
    }
}

fn record_dispatch(
    state: &AppState,
    session_id: &str,
    role: Role,
    connection_id: Uuid,
    event: ClientEvent,
) {
    let kind = event.kind();
    match state.hub.dispatch(session_id, role, connection_id, event) {
        Dispatch::Forwarded => {
            counter!("booth_relay_events_forwarded_total", 1, "kind" => kind);
        }
        Dispatch::Ended => {
            counter!("booth_relay_sessions_ended_total", 1, "by" => role.to_string());
            gauge!("booth_relay_sessions_active", state.hub.session_count() as f64);
        }
        Dispatch::Replied => {}
        Dispatch::Dropped => {
            counter!("booth_relay_events_dropped_total", 1, "kind" => kind);
        }
    }
}

async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(payload)).await
}

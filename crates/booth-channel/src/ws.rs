use std::time::Duration;

use async_trait::async_trait;
use booth_proto::{ClientEvent, Role, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, time::MissedTickBehavior};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::{ChannelError, ChannelResult, RelayConnector, RelayLink};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Joins sessions on a relay reachable over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    join_timeout: Duration,
    heartbeat_interval: Duration,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn join(&self, session_id: &str, role: Role) -> ChannelResult<RelayLink> {
        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        let join = ClientEvent::Join {
            session_id: session_id.to_string(),
            role,
        };
        send_event(&mut socket, &join).await?;

        tokio::time::timeout(self.join_timeout, await_join_ack(&mut socket))
            .await
            .map_err(|_| ChannelError::HandshakeTimeout)??;
        debug!(session_id = %session_id, role = %role, url = %self.url, "joined relay");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            socket,
            outbound_rx,
            inbound_tx,
            self.heartbeat_interval,
        ));

        Ok(RelayLink::new(session_id, outbound_tx, inbound_rx))
    }
}

async fn send_event(socket: &mut Socket, event: &ClientEvent) -> ChannelResult<()> {
    let payload =
        serde_json::to_string(event).map_err(|err| ChannelError::Protocol(err.to_string()))?;
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|err| ChannelError::Transport(err.to_string()))
}

async fn await_join_ack(socket: &mut Socket) -> ChannelResult<()> {
    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|err| ChannelError::Transport(err.to_string()))?;
        match frame {
            Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::Joined { .. }) => return Ok(()),
                Ok(ServerEvent::JoinRejected { reason }) => {
                    return Err(ChannelError::JoinRejected(reason))
                }
                Ok(ServerEvent::Error { message }) => return Err(ChannelError::Protocol(message)),
                Ok(other) => debug!(kind = other.kind(), "ignoring event before join ack"),
                Err(err) => return Err(ChannelError::Protocol(err.to_string())),
            },
            Message::Close(_) => return Err(ChannelError::Closed),
            _ => {}
        }
    }
    Err(ChannelError::Closed)
}

/// Owns the socket after the join: writes queued client events, forwards
/// server events and keeps the connection warm with pings.
async fn run_socket(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
    heartbeat_interval: Duration,
) {
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let Ok(payload) = serde_json::to_string(&event) else {
                    continue;
                };
                if let Err(err) = sink.send(Message::Text(payload.into())).await {
                    warn!(error = %err, "relay write failed");
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::Pong) => {}
                    Ok(event) => {
                        if inbound.send(event).is_err() {
                            flush(&mut sink, &mut outbound).await;
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "ignoring malformed relay frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "relay read failed");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                let Ok(payload) = serde_json::to_string(&ClientEvent::Ping) else {
                    continue;
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn flush<S>(sink: &mut S, outbound: &mut mpsc::UnboundedReceiver<ClientEvent>)
where
    S: SinkExt<Message> + Unpin,
{
    while let Ok(event) = outbound.try_recv() {
        if let Ok(payload) = serde_json::to_string(&event) {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                return;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

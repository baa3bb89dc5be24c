//! Relay channel plumbing.
//!
//! A [`RelayConnector`] joins a session under a role and hands back a
//! [`RelayLink`]. Links are backed either by the in-process [`RelayHub`]
//! (see [`local::LocalConnector`]) or by a WebSocket to a running relay
//! (see [`ws::WsConnector`]). Either way, dropping both halves of a link
//! detaches the connection from its session.

use std::sync::Arc;

use async_trait::async_trait;
use booth_proto::{ClientEvent, Role, ServerEvent};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod hub;
pub mod local;
pub mod ws;

pub use hub::{AttachError, HubConfig, IssuedSession, Lifecycle, RelayHub, SessionStatus};
pub use local::LocalConnector;
pub use ws::WsConnector;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("relay channel closed")]
    Closed,
    #[error("relay handshake timed out")]
    HandshakeTimeout,
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("relay protocol error: {0}")]
    Protocol(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Join `session_id` under `role`. Resolves once the relay has accepted
    /// the join; a refusal surfaces as [`ChannelError::JoinRejected`].
    async fn join(&self, session_id: &str, role: Role) -> ChannelResult<RelayLink>;
}

/// An accepted relay connection for one session and role.
#[derive(Debug)]
pub struct RelayLink {
    sender: RelaySender,
    receiver: RelayReceiver,
}

impl RelayLink {
    pub fn new(
        session_id: &str,
        outbound: mpsc::UnboundedSender<ClientEvent>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        Self {
            sender: RelaySender {
                session_id: Arc::from(session_id),
                tx: outbound,
            },
            receiver: RelayReceiver { rx: inbound },
        }
    }

    pub fn session_id(&self) -> &str {
        &self.sender.session_id
    }

    pub fn split(self) -> (RelaySender, RelayReceiver) {
        (self.sender, self.receiver)
    }
}

#[derive(Debug, Clone)]
pub struct RelaySender {
    session_id: Arc<str>,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl RelaySender {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn send(&self, event: ClientEvent) -> ChannelResult<()> {
        self.tx.send(event).map_err(|_| ChannelError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl RelayReceiver {
    /// Next event from the relay, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test]
    async fn sender_reports_closed_link() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let link = RelayLink::new("abc123", out_tx, in_rx);
        let (sender, _receiver) = link.split();

        sender.send(ClientEvent::Ping).unwrap();
        drop(out_rx);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(ClientEvent::Ping),
            Err(ChannelError::Closed)
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn receiver_ends_when_relay_side_drops() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (_sender, mut receiver) = RelayLink::new("abc123", out_tx, in_rx).split();

        in_tx.send(ServerEvent::RemoteJoined).unwrap();
        drop(in_tx);
        assert_eq!(receiver.recv().await, Some(ServerEvent::RemoteJoined));
        assert_eq!(receiver.recv().await, None);
    }
}

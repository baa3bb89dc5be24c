//! The station's handle on one paired session.

use booth_channel::{ChannelResult, RelayLink, RelaySender};
use booth_proto::{ClientEvent, ServerEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::registry::SessionTicket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub pairing_url: Url,
    pub created_at: DateTime<Utc>,
}

/// What the relay forwarder hands back to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum RelaySignal {
    Event(ServerEvent),
    /// The link went away without a session end.
    Closed,
}

/// Owns the relay link for one session. Created when a session is opened and
/// disposed on teardown; dropping it stops forwarding.
pub struct SessionContext {
    info: SessionInfo,
    epoch: u64,
    sender: RelaySender,
    forwarder: JoinHandle<()>,
}

impl SessionContext {
    /// Start forwarding relay events to `deliver`, tagged with `epoch` so the
    /// receiver can discard signals from an earlier session.
    pub fn open<F>(ticket: SessionTicket, link: RelayLink, epoch: u64, deliver: F) -> Self
    where
        F: Fn(u64, RelaySignal) + Send + 'static,
    {
        let (sender, mut receiver) = link.split();
        let session_id = ticket.session_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                debug!(session_id = %session_id, kind = event.kind(), "relay event");
                deliver(epoch, RelaySignal::Event(event));
            }
            deliver(epoch, RelaySignal::Closed);
        });

        Self {
            info: SessionInfo {
                session_id: ticket.session_id,
                pairing_url: ticket.pairing_url,
                created_at: Utc::now(),
            },
            epoch,
            sender,
            forwarder,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn send(&self, event: ClientEvent) -> ChannelResult<()> {
        self.sender.send(event)
    }

    /// Tear down the link. With `notify_relay` the relay is told the session
    /// is over so the remote hears about it.
    pub fn dispose(self, notify_relay: bool) {
        if notify_relay {
            let end = ClientEvent::EndSession {
                session_id: self.info.session_id.clone(),
            };
            if let Err(err) = self.sender.send(end) {
                warn!(session_id = %self.info.session_id, error = %err, "could not send end_session");
            }
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

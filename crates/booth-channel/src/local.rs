use async_trait::async_trait;
use booth_proto::{ClientEvent, Role, ServerEvent};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::hub::{Attachment, RelayHub};
use crate::{ChannelError, ChannelResult, RelayConnector, RelayLink};

/// Joins sessions on an in-process [`RelayHub`].
#[derive(Clone)]
pub struct LocalConnector {
    hub: RelayHub,
}

impl LocalConnector {
    pub fn new(hub: RelayHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl RelayConnector for LocalConnector {
    async fn join(&self, session_id: &str, role: Role) -> ChannelResult<RelayLink> {
        let attachment = self
            .hub
            .attach(session_id, role)
            .map_err(|err| ChannelError::JoinRejected(err.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(
            self.hub.clone(),
            session_id.to_string(),
            role,
            attachment,
            outbound_rx,
            inbound_tx,
        ));

        Ok(RelayLink::new(session_id, outbound_tx, inbound_rx))
    }
}

/// Shuttles events between a link and its hub seat until either side goes
/// away, then gives the seat back.
async fn pump(
    hub: RelayHub,
    session_id: String,
    role: Role,
    attachment: Attachment,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
) {
    let Attachment {
        connection_id,
        mut receiver,
    } = attachment;

    loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => {
                    hub.dispatch(&session_id, role, connection_id, event);
                }
                None => break,
            },
            event = receiver.recv() => match event {
                Some(event) => {
                    if inbound.send(event).is_err() {
                        drain(&hub, &session_id, role, connection_id, &mut outbound);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    debug!(session_id = %session_id, role = %role, "local link closed");
    hub.detach(&session_id, role, connection_id);
}

/// Deliver whatever the client queued before it dropped its receiver.
fn drain(
    hub: &RelayHub,
    session_id: &str,
    role: Role,
    connection_id: Uuid,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
) {
    while let Ok(event) = outbound.try_recv() {
        hub.dispatch(session_id, role, connection_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use booth_proto::EndReason;

    #[test_timeout::tokio_timeout_test]
    async fn links_exchange_events_through_hub() {
        let hub = RelayHub::new(HubConfig::default());
        let connector = LocalConnector::new(hub.clone());
        let id = hub.issue_session().unwrap().session_id;

        let (_station_tx, mut station_rx) = connector.join(&id, Role::Station).await.unwrap().split();
        let (remote_tx, mut remote_rx) = connector.join(&id, Role::Remote).await.unwrap().split();
        assert_eq!(station_rx.recv().await, Some(ServerEvent::RemoteJoined));

        remote_tx
            .send(ClientEvent::CaptureRequest {
                session_id: id.clone(),
            })
            .unwrap();
        assert_eq!(station_rx.recv().await, Some(ServerEvent::CaptureRequest));

        remote_tx
            .send(ClientEvent::EndSession {
                session_id: id.clone(),
            })
            .unwrap();
        assert_eq!(
            station_rx.recv().await,
            Some(ServerEvent::SessionEnded {
                reason: EndReason::Requested
            })
        );
        assert_eq!(station_rx.recv().await, None);
        assert_eq!(remote_rx.recv().await, None);
    }

    #[test_timeout::tokio_timeout_test]
    async fn dropping_remote_link_reports_remote_left() {
        let hub = RelayHub::new(HubConfig::default());
        let connector = LocalConnector::new(hub.clone());
        let id = hub.issue_session().unwrap().session_id;

        let (_station_tx, mut station_rx) = connector.join(&id, Role::Station).await.unwrap().split();
        let remote = connector.join(&id, Role::Remote).await.unwrap();
        assert_eq!(station_rx.recv().await, Some(ServerEvent::RemoteJoined));

        drop(remote);
        assert_eq!(station_rx.recv().await, Some(ServerEvent::RemoteLeft));
    }

    #[test_timeout::tokio_timeout_test]
    async fn rejected_join_surfaces_reason() {
        let hub = RelayHub::new(HubConfig::default());
        let connector = LocalConnector::new(hub);
        let err = connector.join("nope", Role::Remote).await.unwrap_err();
        assert!(matches!(err, ChannelError::JoinRejected(reason) if reason.contains("unknown")));
    }
}

//! Remote coordinator: the handheld side of a paired session.

use booth_channel::{ChannelError, RelayConnector, RelayReceiver, RelaySender};
use booth_proto::{
    session_id_from_url, ClientEvent, EndReason, ImageData, ImageDataError, PairingError, Role,
    ServerEvent,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot connect: invalid pairing link ({0})")]
    InvalidLink(#[from] PairingError),
    #[error("cannot connect: {0}")]
    Channel(#[from] ChannelError),
    #[error("session is over")]
    SessionOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RemoteState {
    Ready,
    /// A capture was requested and nothing has come back yet.
    AwaitingImage,
    Ended(EndReason),
    /// The relay connection dropped without a session end.
    Disconnected,
}

impl RemoteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteState::Ended(_) | RemoteState::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    ImageReceived(ImageData),
    DeviceError(String),
    SessionEnded(EndReason),
    ConnectionLost,
}

pub struct RemoteCoordinator {
    session_id: String,
    sender: RelaySender,
    receiver: RelayReceiver,
    state: RemoteState,
}

impl RemoteCoordinator {
    /// Join the session named by `pairing_link`. A bad link or a refused join
    /// is final; callers show a "cannot connect" screen instead of retrying.
    pub async fn connect(
        connector: &dyn RelayConnector,
        pairing_link: &str,
    ) -> Result<Self, RemoteError> {
        let session_id = session_id_from_url(pairing_link)?;
        let link = connector.join(&session_id, Role::Remote).await?;
        let (sender, receiver) = link.split();
        info!(session_id = %session_id, "paired with station");
        Ok(Self {
            session_id,
            sender,
            receiver,
            state: RemoteState::Ready,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> RemoteState {
        self.state
    }

    /// Ask the station for a photo. Fire-and-forget: the outcome arrives later
    /// through [`RemoteCoordinator::next_event`].
    pub fn request_capture(&mut self) -> Result<(), RemoteError> {
        if self.state.is_terminal() {
            return Err(RemoteError::SessionOver);
        }
        self.send(ClientEvent::CaptureRequest {
            session_id: self.session_id.clone(),
        })?;
        self.state = RemoteState::AwaitingImage;
        Ok(())
    }

    pub fn end_session(&mut self) -> Result<(), RemoteError> {
        if self.state.is_terminal() {
            return Err(RemoteError::SessionOver);
        }
        self.send(ClientEvent::EndSession {
            session_id: self.session_id.clone(),
        })?;
        self.state = RemoteState::Ended(EndReason::Requested);
        Ok(())
    }

    /// Next meaningful event from the station. `None` once the session is
    /// over and the terminal event has been reported.
    pub async fn next_event(&mut self) -> Option<RemoteEvent> {
        if self.state.is_terminal() {
            return None;
        }
        loop {
            let Some(event) = self.receiver.recv().await else {
                warn!(session_id = %self.session_id, "relay connection lost");
                self.state = RemoteState::Disconnected;
                return Some(RemoteEvent::ConnectionLost);
            };
            match event {
                ServerEvent::ImageCaptured { image_data } => {
                    match ImageData::from_data_url(&image_data) {
                        Ok(image) => {
                            self.state = RemoteState::Ready;
                            return Some(RemoteEvent::ImageReceived(image));
                        }
                        Err(err) => self.log_bad_image(err),
                    }
                }
                ServerEvent::DeviceError { message } => {
                    self.state = RemoteState::Ready;
                    return Some(RemoteEvent::DeviceError(message));
                }
                ServerEvent::SessionEnded { reason } => {
                    info!(session_id = %self.session_id, ?reason, "session ended");
                    self.state = RemoteState::Ended(reason);
                    return Some(RemoteEvent::SessionEnded(reason));
                }
                other => debug!(kind = other.kind(), "ignoring relay event"),
            }
        }
    }

    fn send(&mut self, event: ClientEvent) -> Result<(), RemoteError> {
        if let Err(err) = self.sender.send(event) {
            self.state = RemoteState::Disconnected;
            return Err(err.into());
        }
        Ok(())
    }

    fn log_bad_image(&self, err: ImageDataError) {
        warn!(session_id = %self.session_id, error = %err, "discarding undecodable image");
    }
}

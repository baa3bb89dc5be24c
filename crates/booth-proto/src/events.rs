use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a session a connection speaks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The stationary capture station that owns the camera.
    Station,
    /// The handheld remote that triggers captures.
    Remote,
}

impl Role {
    pub fn counterpart(self) -> Role {
        match self {
            Role::Station => Role::Remote,
            Role::Remote => Role::Station,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Station => f.write_str("station"),
            Role::Remote => f.write_str("remote"),
        }
    }
}

/// Why a session stopped existing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// One of the parties asked for the session to end.
    Requested,
    /// The station connection went away.
    StationLeft,
    /// Nothing happened within the inactivity window.
    Expired,
}

/// Messages sent from a client (station or remote) to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Register presence in a session under a role.
    Join { session_id: String, role: Role },
    /// Remote asks the station to take a photo.
    CaptureRequest { session_id: String },
    /// Station delivers an encoded still to the paired remote.
    ImageCaptured {
        session_id: String,
        image_data: String,
    },
    /// Station could not produce an image.
    DeviceError { session_id: String, message: String },
    /// Either side finishes the session.
    EndSession { session_id: String },
    /// Connection heartbeat; does not count as session activity.
    Ping,
}

impl ClientEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ClientEvent::Join { session_id, .. }
            | ClientEvent::CaptureRequest { session_id }
            | ClientEvent::ImageCaptured { session_id, .. }
            | ClientEvent::DeviceError { session_id, .. }
            | ClientEvent::EndSession { session_id } => Some(session_id),
            ClientEvent::Ping => None,
        }
    }

    /// Short label used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::CaptureRequest { .. } => "capture_request",
            ClientEvent::ImageCaptured { .. } => "image_captured",
            ClientEvent::DeviceError { .. } => "device_error",
            ClientEvent::EndSession { .. } => "end_session",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The join was accepted.
    Joined { session_id: String, role: Role },
    /// The join was refused; the connection will be closed.
    JoinRejected { reason: String },
    /// A remote attached to the station's session.
    RemoteJoined,
    /// The remote detached.
    RemoteLeft,
    /// The remote asked for a capture.
    CaptureRequest,
    /// The session is over.
    SessionEnded { reason: EndReason },
    /// A captured image, delivered to the remote.
    ImageCaptured { image_data: String },
    /// The station reported a capture failure.
    DeviceError { message: String },
    Pong,
    Error { message: String },
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::JoinRejected { .. } => "join_rejected",
            ServerEvent::RemoteJoined => "remote_joined",
            ServerEvent::RemoteLeft => "remote_left",
            ServerEvent::CaptureRequest => "capture_request",
            ServerEvent::SessionEnded { .. } => "session_ended",
            ServerEvent::ImageCaptured { .. } => "image_captured",
            ServerEvent::DeviceError { .. } => "device_error",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn join_uses_snake_case_tags() {
        let event = ClientEvent::Join {
            session_id: "abc123".into(),
            role: Role::Station,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({ "type": "join", "session_id": "abc123", "role": "station" })
        );
    }

    #[test_timeout::timeout]
    fn unit_server_events_parse_from_bare_tags() {
        let parsed: ServerEvent = serde_json::from_str(r#"{"type":"remote_joined"}"#).unwrap();
        assert_eq!(parsed, ServerEvent::RemoteJoined);

        let parsed: ServerEvent =
            serde_json::from_str(r#"{"type":"session_ended","reason":"expired"}"#).unwrap();
        assert_eq!(
            parsed,
            ServerEvent::SessionEnded {
                reason: EndReason::Expired
            }
        );
    }

    #[test_timeout::timeout]
    fn unknown_event_type_is_rejected() {
        let parsed = serde_json::from_str::<ClientEvent>(r#"{"type":"teleport"}"#);
        assert!(parsed.is_err());
    }

    #[test_timeout::timeout]
    fn ping_has_no_session() {
        assert_eq!(ClientEvent::Ping.session_id(), None);
        let capture = ClientEvent::CaptureRequest {
            session_id: "s1".into(),
        };
        assert_eq!(capture.session_id(), Some("s1"));
        assert_eq!(capture.kind(), "capture_request");
    }

    #[test_timeout::timeout]
    fn roles_are_counterparts() {
        assert_eq!(Role::Station.counterpart(), Role::Remote);
        assert_eq!(Role::Remote.counterpart(), Role::Station);
        assert_eq!(Role::Remote.to_string(), "remote");
    }
}

//! In-memory session registry and event router.
//!
//! The hub is the single source of truth for role cardinality: one station
//! and at most one remote per session. Clients only observe the resulting
//! join/leave events.

use std::{sync::Arc, time::Duration};

use booth_proto::{pairing_url, ClientEvent, EndReason, PairingError, Role, ServerEvent};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Base under which pairing URLs are minted (`<base>/mobile/<id>`).
    pub public_base_url: String,
    /// Sessions with no protocol traffic for this long are retired.
    pub idle_timeout: Duration,
    pub recycle_interval: Duration,
    /// How long a fresh connection has to send its `join`.
    pub handshake_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://127.0.0.1:8080".to_string(),
            idle_timeout: Duration::from_secs(5 * 60),
            recycle_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Paired,
    Active,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: String,
    pub pairing_url: Url,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: String,
    pub lifecycle: Lifecycle,
    pub station_attached: bool,
    pub remote_attached: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("unknown or expired session")]
    UnknownSession,
    #[error("a station is already attached to this session")]
    StationPresent,
    #[error("a remote is already attached to this session")]
    RemotePresent,
}

impl AttachError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            AttachError::UnknownSession => "unknown_session",
            AttachError::StationPresent => "station_present",
            AttachError::RemotePresent => "remote_present",
        }
    }
}

/// A connection's seat in a session. Events for it arrive on `receiver`.
#[derive(Debug)]
pub struct Attachment {
    pub connection_id: Uuid,
    pub receiver: mpsc::UnboundedReceiver<ServerEvent>,
}

/// What the hub did with a dispatched client event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Forwarded,
    Replied,
    Ended,
    Dropped,
}

#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    sessions: DashMap<String, Arc<SessionSlot>>,
    config: HubConfig,
}

struct SessionSlot {
    id: String,
    state: Mutex<SlotState>,
}

struct SlotState {
    lifecycle: Lifecycle,
    station: Option<Member>,
    remote: Option<Member>,
    last_activity: Instant,
    retired: bool,
}

struct Member {
    connection_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl SlotState {
    fn seat(&self, role: Role) -> &Option<Member> {
        match role {
            Role::Station => &self.station,
            Role::Remote => &self.remote,
        }
    }

    fn seat_mut(&mut self, role: Role) -> &mut Option<Member> {
        match role {
            Role::Station => &mut self.station,
            Role::Remote => &mut self.remote,
        }
    }

    /// A seat whose connection already went away counts as free.
    fn occupied(&self, role: Role) -> bool {
        self.seat(role)
            .as_ref()
            .is_some_and(|member| !member.tx.is_closed())
    }

    fn is_member(&self, role: Role, connection_id: Uuid) -> bool {
        self.seat(role)
            .as_ref()
            .is_some_and(|member| member.connection_id == connection_id)
    }

    fn send_to(&self, role: Role, event: ServerEvent) -> bool {
        match self.seat(role) {
            Some(member) => member.tx.send(event).is_ok(),
            None => false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn retire(&mut self) {
        self.retired = true;
        self.station = None;
        self.remote = None;
    }
}

impl RelayHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: DashMap::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Mint a fresh session and its pairing URL.
    pub fn issue_session(&self) -> Result<IssuedSession, PairingError> {
        let session_id = Uuid::new_v4().to_string();
        let pairing_url = pairing_url(&self.inner.config.public_base_url, &session_id)?;
        let slot = Arc::new(SessionSlot {
            id: session_id.clone(),
            state: Mutex::new(SlotState {
                lifecycle: Lifecycle::Created,
                station: None,
                remote: None,
                last_activity: Instant::now(),
                retired: false,
            }),
        });
        self.inner.sessions.insert(session_id.clone(), slot);
        counter!("booth_relay_sessions_issued_total", 1);
        info!(session_id = %session_id, "session issued");
        Ok(IssuedSession {
            session_id,
            pairing_url,
        })
    }

    pub fn attach(&self, session_id: &str, role: Role) -> Result<Attachment, AttachError> {
        let slot = self.slot(session_id).ok_or(AttachError::UnknownSession)?;
        let mut state = slot.state.lock();
        if state.retired {
            return Err(AttachError::UnknownSession);
        }
        if state.occupied(role) {
            return Err(match role {
                Role::Station => AttachError::StationPresent,
                Role::Remote => AttachError::RemotePresent,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        *state.seat_mut(role) = Some(Member { connection_id, tx });

        match role {
            Role::Station => {
                if state.occupied(Role::Remote) {
                    state.send_to(Role::Station, ServerEvent::RemoteJoined);
                }
            }
            Role::Remote => {
                if state.lifecycle == Lifecycle::Created {
                    state.lifecycle = Lifecycle::Paired;
                }
                state.send_to(Role::Station, ServerEvent::RemoteJoined);
            }
        }
        state.touch();

        info!(session_id = %session_id, role = %role, connection_id = %connection_id, "attached");
        Ok(Attachment {
            connection_id,
            receiver: rx,
        })
    }

    /// Route one client event. Misrouted or out-of-context events are dropped.
    pub fn dispatch(
        &self,
        session_id: &str,
        role: Role,
        connection_id: Uuid,
        event: ClientEvent,
    ) -> Dispatch {
        let Some(slot) = self.slot(session_id) else {
            return Dispatch::Dropped;
        };
        if event.session_id().is_some_and(|id| id != session_id) {
            debug!(session_id = %session_id, kind = event.kind(), "dropping event for foreign session");
            return Dispatch::Dropped;
        }

        let mut state = slot.state.lock();
        if state.retired || !state.is_member(role, connection_id) {
            return Dispatch::Dropped;
        }

        let outcome = match (role, event) {
            (_, ClientEvent::Ping) => {
                if state.send_to(role, ServerEvent::Pong) {
                    Dispatch::Replied
                } else {
                    Dispatch::Dropped
                }
            }
            (Role::Remote, ClientEvent::CaptureRequest { .. }) => {
                state.touch();
                forwarded(state.send_to(Role::Station, ServerEvent::CaptureRequest))
            }
            (Role::Station, ClientEvent::ImageCaptured { image_data, .. }) => {
                state.touch();
                let delivered = state.send_to(Role::Remote, ServerEvent::ImageCaptured { image_data });
                if delivered {
                    state.lifecycle = Lifecycle::Active;
                }
                forwarded(delivered)
            }
            (Role::Station, ClientEvent::DeviceError { message, .. }) => {
                state.touch();
                forwarded(state.send_to(Role::Remote, ServerEvent::DeviceError { message }))
            }
            (_, ClientEvent::EndSession { .. }) => {
                state.send_to(
                    role.counterpart(),
                    ServerEvent::SessionEnded {
                        reason: EndReason::Requested,
                    },
                );
                state.retire();
                Dispatch::Ended
            }
            (_, other) => {
                debug!(session_id = %session_id, role = %role, kind = other.kind(), "dropping misrouted event");
                Dispatch::Dropped
            }
        };
        drop(state);

        if outcome == Dispatch::Ended {
            self.remove_slot(&slot);
            info!(session_id = %session_id, ended_by = %role, "session ended");
        }
        outcome
    }

    pub fn detach(&self, session_id: &str, role: Role, connection_id: Uuid) {
        let Some(slot) = self.slot(session_id) else {
            return;
        };
        let mut state = slot.state.lock();
        if !state.is_member(role, connection_id) {
            return;
        }

        match role {
            Role::Remote => {
                state.remote = None;
                state.send_to(Role::Station, ServerEvent::RemoteLeft);
                state.touch();
                info!(session_id = %session_id, "remote detached");
            }
            Role::Station => {
                state.send_to(
                    Role::Remote,
                    ServerEvent::SessionEnded {
                        reason: EndReason::StationLeft,
                    },
                );
                state.retire();
                drop(state);
                self.remove_slot(&slot);
                info!(session_id = %session_id, "station detached; session retired");
            }
        }
    }

    /// Retire every session idle for longer than the configured window.
    pub fn expire_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.inner.config.idle_timeout;
        let slots: Vec<Arc<SessionSlot>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut expired = 0usize;
        for slot in slots {
            let mut state = slot.state.lock();
            if now.saturating_duration_since(state.last_activity) <= idle_timeout {
                continue;
            }
            for role in [Role::Station, Role::Remote] {
                state.send_to(
                    role,
                    ServerEvent::SessionEnded {
                        reason: EndReason::Expired,
                    },
                );
            }
            state.retire();
            drop(state);
            self.remove_slot(&slot);
            counter!("booth_relay_sessions_expired_total", 1);
            info!(session_id = %slot.id, "session expired");
            expired += 1;
        }
        expired
    }

    pub fn spawn_recycler(&self) -> JoinHandle<()> {
        let hub = self.clone();
        let mut interval = tokio::time::interval(self.inner.config.recycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let _ = hub.expire_idle(Instant::now());
            }
        })
    }

    pub fn describe(&self, session_id: &str) -> Option<SessionStatus> {
        let slot = self.slot(session_id)?;
        let state = slot.state.lock();
        if state.retired {
            return None;
        }
        Some(SessionStatus {
            session_id: slot.id.clone(),
            lifecycle: state.lifecycle,
            station_attached: state.occupied(Role::Station),
            remote_attached: state.occupied(Role::Remote),
        })
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    fn slot(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn remove_slot(&self, slot: &Arc<SessionSlot>) {
        self.inner
            .sessions
            .remove_if(&slot.id, |_, existing| Arc::ptr_eq(existing, slot));
    }
}

fn forwarded(delivered: bool) -> Dispatch {
    if delivered {
        Dispatch::Forwarded
    } else {
        Dispatch::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> RelayHub {
        RelayHub::new(HubConfig {
            public_base_url: "https://x".into(),
            ..HubConfig::default()
        })
    }

    fn capture(session_id: &str) -> ClientEvent {
        ClientEvent::CaptureRequest {
            session_id: session_id.into(),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn issued_session_embeds_id_in_pairing_url() {
        let hub = hub();
        let issued = hub.issue_session().unwrap();
        assert_eq!(
            issued.pairing_url.as_str(),
            format!("https://x/mobile/{}", issued.session_id)
        );
        let status = hub.describe(&issued.session_id).unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Created);
        assert!(!status.station_attached);
        assert_ne!(hub.issue_session().unwrap().session_id, issued.session_id);
    }

    #[test_timeout::tokio_timeout_test]
    async fn enforces_one_station_and_one_remote() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;

        assert_eq!(
            hub.attach("missing", Role::Station).unwrap_err(),
            AttachError::UnknownSession
        );
        let _station = hub.attach(&id, Role::Station).unwrap();
        assert_eq!(
            hub.attach(&id, Role::Station).unwrap_err(),
            AttachError::StationPresent
        );
        let _remote = hub.attach(&id, Role::Remote).unwrap();
        assert_eq!(
            hub.attach(&id, Role::Remote).unwrap_err(),
            AttachError::RemotePresent
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn remote_join_and_leave_reach_station() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let mut station = hub.attach(&id, Role::Station).unwrap();
        let remote = hub.attach(&id, Role::Remote).unwrap();

        assert_eq!(station.receiver.recv().await, Some(ServerEvent::RemoteJoined));
        assert_eq!(hub.describe(&id).unwrap().lifecycle, Lifecycle::Paired);

        hub.detach(&id, Role::Remote, remote.connection_id);
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::RemoteLeft));

        // The seat is free again for the next remote.
        let _next = hub.attach(&id, Role::Remote).unwrap();
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::RemoteJoined));
    }

    #[test_timeout::tokio_timeout_test]
    async fn late_station_learns_about_waiting_remote() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let _remote = hub.attach(&id, Role::Remote).unwrap();
        let mut station = hub.attach(&id, Role::Station).unwrap();
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::RemoteJoined));
    }

    #[test_timeout::tokio_timeout_test]
    async fn routes_events_by_role() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let mut station = hub.attach(&id, Role::Station).unwrap();
        let mut remote = hub.attach(&id, Role::Remote).unwrap();
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::RemoteJoined));

        assert_eq!(
            hub.dispatch(&id, Role::Remote, remote.connection_id, capture(&id)),
            Dispatch::Forwarded
        );
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::CaptureRequest));

        // A station cannot ask itself for a capture.
        assert_eq!(
            hub.dispatch(&id, Role::Station, station.connection_id, capture(&id)),
            Dispatch::Dropped
        );
        // Nor can a remote forge an image.
        let forged = ClientEvent::ImageCaptured {
            session_id: id.clone(),
            image_data: "data:image/png;base64,AA==".into(),
        };
        assert_eq!(
            hub.dispatch(&id, Role::Remote, remote.connection_id, forged),
            Dispatch::Dropped
        );

        let image = ClientEvent::ImageCaptured {
            session_id: id.clone(),
            image_data: "data:image/png;base64,AA==".into(),
        };
        assert_eq!(
            hub.dispatch(&id, Role::Station, station.connection_id, image),
            Dispatch::Forwarded
        );
        assert_eq!(
            remote.receiver.recv().await,
            Some(ServerEvent::ImageCaptured {
                image_data: "data:image/png;base64,AA==".into()
            })
        );
        assert_eq!(hub.describe(&id).unwrap().lifecycle, Lifecycle::Active);

        let error = ClientEvent::DeviceError {
            session_id: id.clone(),
            message: "camera unavailable".into(),
        };
        hub.dispatch(&id, Role::Station, station.connection_id, error);
        assert_eq!(
            remote.receiver.recv().await,
            Some(ServerEvent::DeviceError {
                message: "camera unavailable".into()
            })
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn ignores_events_for_other_sessions_and_stale_connections() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let _station = hub.attach(&id, Role::Station).unwrap();
        let remote = hub.attach(&id, Role::Remote).unwrap();

        assert_eq!(
            hub.dispatch(&id, Role::Remote, remote.connection_id, capture("other")),
            Dispatch::Dropped
        );
        assert_eq!(
            hub.dispatch(&id, Role::Remote, Uuid::new_v4(), capture(&id)),
            Dispatch::Dropped
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn end_session_notifies_counterpart_and_retires() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let mut station = hub.attach(&id, Role::Station).unwrap();
        let mut remote = hub.attach(&id, Role::Remote).unwrap();
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::RemoteJoined));

        let end = ClientEvent::EndSession {
            session_id: id.clone(),
        };
        assert_eq!(
            hub.dispatch(&id, Role::Remote, remote.connection_id, end),
            Dispatch::Ended
        );
        assert_eq!(
            station.receiver.recv().await,
            Some(ServerEvent::SessionEnded {
                reason: EndReason::Requested
            })
        );
        assert_eq!(station.receiver.recv().await, None);
        assert_eq!(remote.receiver.recv().await, None);
        assert!(hub.describe(&id).is_none());
        assert_eq!(
            hub.attach(&id, Role::Remote).unwrap_err(),
            AttachError::UnknownSession
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn station_leaving_ends_session_for_remote() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let station = hub.attach(&id, Role::Station).unwrap();
        let mut remote = hub.attach(&id, Role::Remote).unwrap();

        hub.detach(&id, Role::Station, station.connection_id);
        assert_eq!(
            remote.receiver.recv().await,
            Some(ServerEvent::SessionEnded {
                reason: EndReason::StationLeft
            })
        );
        assert_eq!(hub.session_count(), 0);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn idle_sessions_expire_and_pings_do_not_count() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let mut station = hub.attach(&id, Role::Station).unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(
            hub.dispatch(&id, Role::Station, station.connection_id, ClientEvent::Ping),
            Dispatch::Replied
        );
        assert_eq!(station.receiver.recv().await, Some(ServerEvent::Pong));
        assert_eq!(hub.expire_idle(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(hub.expire_idle(Instant::now()), 1);
        assert_eq!(
            station.receiver.recv().await,
            Some(ServerEvent::SessionEnded {
                reason: EndReason::Expired
            })
        );
        assert!(hub.describe(&id).is_none());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn activity_keeps_session_alive() {
        let hub = hub();
        let id = hub.issue_session().unwrap().session_id;
        let _station = hub.attach(&id, Role::Station).unwrap();
        let remote = hub.attach(&id, Role::Remote).unwrap();

        tokio::time::advance(Duration::from_secs(250)).await;
        hub.dispatch(&id, Role::Remote, remote.connection_id, capture(&id));
        tokio::time::advance(Duration::from_secs(250)).await;
        assert_eq!(hub.expire_idle(Instant::now()), 0);
        assert!(hub.describe(&id).is_some());
    }
}

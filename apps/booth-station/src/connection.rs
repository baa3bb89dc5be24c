//! Remote presence as seen by the station.
//!
//! Transitions are pure: they return the next state plus the side effects the
//! coordinator has to run. Join/leave notifications may repeat across
//! reconnects, so every transition is idempotent.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    NoRemote,
    Connected,
    InSequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    RemoteJoined,
    RemoteLeft,
    SessionEnded,
    SequenceStarted,
    SequenceFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEffect {
    AcquireDevice,
    ReleaseDevice,
    DiscardImage,
    AbortSequence,
}

impl ConnectionState {
    pub fn remote_present(self) -> bool {
        !matches!(self, ConnectionState::NoRemote)
    }

    pub fn transition(self, event: ConnectionEvent) -> (ConnectionState, Vec<ConnectionEffect>) {
        use ConnectionEffect::*;
        use ConnectionState::*;

        match (self, event) {
            (NoRemote, ConnectionEvent::RemoteJoined) => (Connected, vec![AcquireDevice]),
            (state, ConnectionEvent::RemoteJoined) => (state, Vec::new()),

            (NoRemote, ConnectionEvent::RemoteLeft) => (NoRemote, Vec::new()),
            (Connected, ConnectionEvent::RemoteLeft) => {
                (NoRemote, vec![ReleaseDevice, DiscardImage])
            }
            (InSequence, ConnectionEvent::RemoteLeft) => {
                (NoRemote, vec![AbortSequence, ReleaseDevice, DiscardImage])
            }

            // Teardown releases unconditionally.
            (InSequence, ConnectionEvent::SessionEnded) => {
                (NoRemote, vec![AbortSequence, ReleaseDevice, DiscardImage])
            }
            (_, ConnectionEvent::SessionEnded) => (NoRemote, vec![ReleaseDevice, DiscardImage]),

            (Connected, ConnectionEvent::SequenceStarted) => (InSequence, Vec::new()),
            (InSequence, ConnectionEvent::SequenceFinished) => (Connected, Vec::new()),
            (state, ConnectionEvent::SequenceStarted | ConnectionEvent::SequenceFinished) => {
                (state, Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent::*;

    fn run(events: &[ConnectionEvent]) -> ConnectionState {
        events
            .iter()
            .fold(ConnectionState::NoRemote, |state, event| state.transition(*event).0)
    }

    #[test_timeout::timeout]
    fn join_acquires_and_leave_releases() {
        let (state, effects) = ConnectionState::NoRemote.transition(RemoteJoined);
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(effects, vec![ConnectionEffect::AcquireDevice]);

        let (state, effects) = state.transition(RemoteLeft);
        assert_eq!(state, ConnectionState::NoRemote);
        assert_eq!(
            effects,
            vec![ConnectionEffect::ReleaseDevice, ConnectionEffect::DiscardImage]
        );
    }

    #[test_timeout::timeout]
    fn repeated_notifications_are_idempotent() {
        let (state, effects) = ConnectionState::Connected.transition(RemoteJoined);
        assert_eq!(state, ConnectionState::Connected);
        assert!(effects.is_empty());

        let (state, effects) = ConnectionState::NoRemote.transition(RemoteLeft);
        assert_eq!(state, ConnectionState::NoRemote);
        assert!(effects.is_empty());
    }

    #[test_timeout::timeout]
    fn leaving_mid_sequence_aborts_it() {
        let (state, effects) = ConnectionState::InSequence.transition(RemoteLeft);
        assert_eq!(state, ConnectionState::NoRemote);
        assert_eq!(effects[0], ConnectionEffect::AbortSequence);

        let (state, effects) = ConnectionState::InSequence.transition(SessionEnded);
        assert_eq!(state, ConnectionState::NoRemote);
        assert!(effects.contains(&ConnectionEffect::ReleaseDevice));
    }

    #[test_timeout::timeout]
    fn session_end_always_releases() {
        for state in [
            ConnectionState::NoRemote,
            ConnectionState::Connected,
            ConnectionState::InSequence,
        ] {
            let (next, effects) = state.transition(SessionEnded);
            assert_eq!(next, ConnectionState::NoRemote);
            assert!(effects.contains(&ConnectionEffect::ReleaseDevice));
            assert!(effects.contains(&ConnectionEffect::DiscardImage));
        }
    }

    #[test_timeout::timeout]
    fn sequences_only_start_with_a_remote() {
        assert_eq!(
            ConnectionState::NoRemote.transition(SequenceStarted).0,
            ConnectionState::NoRemote
        );
        assert_eq!(run(&[RemoteJoined, SequenceStarted]), ConnectionState::InSequence);
        assert_eq!(
            run(&[RemoteJoined, SequenceStarted, SequenceFinished]),
            ConnectionState::Connected
        );
    }

    #[test_timeout::timeout]
    fn connected_iff_last_presence_event_was_join() {
        let alphabet = [RemoteJoined, RemoteLeft, SessionEnded, SequenceStarted, SequenceFinished];
        // Every sequence of up to four events.
        let mut sequences: Vec<Vec<ConnectionEvent>> = vec![Vec::new()];
        let mut frontier = sequences.clone();
        for _ in 0..4 {
            let mut next = Vec::new();
            for prefix in &frontier {
                for event in alphabet {
                    let mut extended = prefix.clone();
                    extended.push(event);
                    next.push(extended);
                }
            }
            sequences.extend(next.iter().cloned());
            frontier = next;
        }

        for events in sequences {
            let expected = events
                .iter()
                .rev()
                .find(|event| matches!(event, RemoteJoined | RemoteLeft | SessionEnded))
                .is_some_and(|event| *event == RemoteJoined);
            assert_eq!(
                run(&events).remote_present(),
                expected,
                "events: {events:?}"
            );
        }
    }
}

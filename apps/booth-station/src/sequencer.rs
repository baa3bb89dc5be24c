//! Countdown → capture → cooldown state machine.
//!
//! The sequencer never touches timers or devices itself. Each input returns
//! the actions the coordinator must perform, which keeps single-flight and
//! recovery behaviour testable without a runtime.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SequencePhase {
    #[default]
    Idle,
    Countdown { remaining: u8 },
    Capturing,
    /// The first capture attempt failed; the device is being re-initialised.
    Recovering,
    Cooldown,
}

impl SequencePhase {
    pub fn is_idle(self) -> bool {
        matches!(self, SequencePhase::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceInput {
    Request,
    Tick,
    CaptureSucceeded { at: DateTime<Utc> },
    CaptureFailed { message: String },
    RecoverySucceeded,
    RecoveryFailed { message: String },
    CooldownElapsed,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceAction {
    /// A request was accepted and a new sequence began.
    Started,
    ShowCountdown(u8),
    ScheduleTick,
    InvokeCapture,
    Reinitialize,
    PublishImage,
    EmitDeviceError(String),
    ScheduleCooldown,
    /// Back to idle; pending timers can be dropped.
    Finished,
}

#[derive(Debug, Clone)]
pub struct CaptureSequencer {
    phase: SequencePhase,
    countdown_ticks: u8,
    recovery_attempted: bool,
    sequence_id: u64,
    capture_count: u64,
    last_capture: Option<DateTime<Utc>>,
}

impl CaptureSequencer {
    pub fn new(countdown_ticks: u8) -> Self {
        Self {
            phase: SequencePhase::Idle,
            countdown_ticks: countdown_ticks.max(1),
            recovery_attempted: false,
            sequence_id: 0,
            capture_count: 0,
            last_capture: None,
        }
    }

    pub fn phase(&self) -> SequencePhase {
        self.phase
    }

    /// Identifies the current (or most recent) sequence. Timer and device
    /// results tagged with an older id are stale.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn capture_count(&self) -> u64 {
        self.capture_count
    }

    pub fn last_capture(&self) -> Option<DateTime<Utc>> {
        self.last_capture
    }

    /// Forget counters and abandon any running sequence.
    pub fn reset(&mut self) {
        self.phase = SequencePhase::Idle;
        self.recovery_attempted = false;
        self.capture_count = 0;
        self.last_capture = None;
    }

    pub fn handle(&mut self, input: SequenceInput) -> Vec<SequenceAction> {
        use SequenceAction as A;

        match (self.phase, input) {
            (SequencePhase::Idle, SequenceInput::Request) => {
                self.sequence_id += 1;
                self.recovery_attempted = false;
                self.phase = SequencePhase::Countdown {
                    remaining: self.countdown_ticks,
                };
                vec![A::Started, A::ShowCountdown(self.countdown_ticks), A::ScheduleTick]
            }
            // Single-flight: requests are dropped, not queued.
            (_, SequenceInput::Request) => Vec::new(),

            (SequencePhase::Countdown { remaining }, SequenceInput::Tick) => {
                let remaining = remaining.saturating_sub(1);
                if remaining > 0 {
                    self.phase = SequencePhase::Countdown { remaining };
                    vec![A::ShowCountdown(remaining), A::ScheduleTick]
                } else {
                    self.phase = SequencePhase::Capturing;
                    vec![A::InvokeCapture]
                }
            }

            (SequencePhase::Capturing, SequenceInput::CaptureSucceeded { at }) => {
                self.capture_count += 1;
                self.last_capture = Some(at);
                self.phase = SequencePhase::Cooldown;
                vec![A::PublishImage, A::ScheduleCooldown]
            }
            (SequencePhase::Capturing, SequenceInput::CaptureFailed { message }) => {
                if self.recovery_attempted {
                    self.phase = SequencePhase::Idle;
                    vec![A::EmitDeviceError(message), A::Finished]
                } else {
                    self.recovery_attempted = true;
                    self.phase = SequencePhase::Recovering;
                    vec![A::Reinitialize]
                }
            }

            (SequencePhase::Recovering, SequenceInput::RecoverySucceeded) => {
                self.phase = SequencePhase::Capturing;
                vec![A::InvokeCapture]
            }
            (SequencePhase::Recovering, SequenceInput::RecoveryFailed { message }) => {
                self.phase = SequencePhase::Idle;
                vec![A::EmitDeviceError(message), A::Finished]
            }

            (SequencePhase::Cooldown, SequenceInput::CooldownElapsed) => {
                self.phase = SequencePhase::Idle;
                vec![A::Finished]
            }

            (SequencePhase::Idle, SequenceInput::Abort) => Vec::new(),
            (_, SequenceInput::Abort) => {
                self.phase = SequencePhase::Idle;
                vec![A::Finished]
            }

            // Anything else arrived out of phase.
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SequenceAction as A;

    fn counted_down(sequencer: &mut CaptureSequencer) -> Vec<SequenceAction> {
        let mut actions = sequencer.handle(SequenceInput::Request);
        for _ in 0..3 {
            actions.extend(sequencer.handle(SequenceInput::Tick));
        }
        actions
    }

    #[test_timeout::timeout]
    fn countdown_shows_three_two_one_then_captures() {
        let mut sequencer = CaptureSequencer::new(3);
        let actions = counted_down(&mut sequencer);
        assert_eq!(
            actions,
            vec![
                A::Started,
                A::ShowCountdown(3),
                A::ScheduleTick,
                A::ShowCountdown(2),
                A::ScheduleTick,
                A::ShowCountdown(1),
                A::ScheduleTick,
                A::InvokeCapture,
            ]
        );
        assert_eq!(sequencer.phase(), SequencePhase::Capturing);
    }

    #[test_timeout::timeout]
    fn success_publishes_once_and_counts() {
        let mut sequencer = CaptureSequencer::new(3);
        counted_down(&mut sequencer);
        let at = Utc::now();
        assert_eq!(
            sequencer.handle(SequenceInput::CaptureSucceeded { at }),
            vec![A::PublishImage, A::ScheduleCooldown]
        );
        assert_eq!(sequencer.capture_count(), 1);
        assert_eq!(sequencer.last_capture(), Some(at));
        assert_eq!(sequencer.phase(), SequencePhase::Cooldown);

        // Late duplicate results do nothing.
        assert!(sequencer
            .handle(SequenceInput::CaptureSucceeded { at })
            .is_empty());
        assert_eq!(sequencer.capture_count(), 1);

        assert_eq!(
            sequencer.handle(SequenceInput::CooldownElapsed),
            vec![A::Finished]
        );
        assert!(sequencer.phase().is_idle());
    }

    #[test_timeout::timeout]
    fn requests_while_busy_are_ignored() {
        let mut sequencer = CaptureSequencer::new(3);
        sequencer.handle(SequenceInput::Request);
        let first_id = sequencer.sequence_id();
        assert!(sequencer.handle(SequenceInput::Request).is_empty());

        for _ in 0..3 {
            sequencer.handle(SequenceInput::Tick);
        }
        assert!(sequencer.handle(SequenceInput::Request).is_empty());
        sequencer.handle(SequenceInput::CaptureSucceeded { at: Utc::now() });
        assert!(sequencer.handle(SequenceInput::Request).is_empty());
        assert_eq!(sequencer.sequence_id(), first_id);
    }

    #[test_timeout::timeout]
    fn one_recovery_then_device_error() {
        let mut sequencer = CaptureSequencer::new(3);
        counted_down(&mut sequencer);

        let failed = SequenceInput::CaptureFailed {
            message: "no frame".into(),
        };
        assert_eq!(sequencer.handle(failed.clone()), vec![A::Reinitialize]);
        assert_eq!(sequencer.phase(), SequencePhase::Recovering);
        assert_eq!(
            sequencer.handle(SequenceInput::RecoverySucceeded),
            vec![A::InvokeCapture]
        );
        assert_eq!(
            sequencer.handle(failed),
            vec![A::EmitDeviceError("no frame".into()), A::Finished]
        );
        assert!(sequencer.phase().is_idle());
        assert_eq!(sequencer.capture_count(), 0);
    }

    #[test_timeout::timeout]
    fn failed_recovery_reports_error() {
        let mut sequencer = CaptureSequencer::new(3);
        counted_down(&mut sequencer);
        sequencer.handle(SequenceInput::CaptureFailed {
            message: "device not acquired".into(),
        });
        assert_eq!(
            sequencer.handle(SequenceInput::RecoveryFailed {
                message: "camera unplugged".into()
            }),
            vec![A::EmitDeviceError("camera unplugged".into()), A::Finished]
        );
    }

    #[test_timeout::timeout]
    fn recovery_budget_resets_per_sequence() {
        let mut sequencer = CaptureSequencer::new(1);
        sequencer.handle(SequenceInput::Request);
        sequencer.handle(SequenceInput::Tick);
        sequencer.handle(SequenceInput::CaptureFailed {
            message: "x".into(),
        });
        sequencer.handle(SequenceInput::RecoveryFailed {
            message: "x".into(),
        });

        sequencer.handle(SequenceInput::Request);
        sequencer.handle(SequenceInput::Tick);
        assert_eq!(
            sequencer.handle(SequenceInput::CaptureFailed {
                message: "x".into()
            }),
            vec![A::Reinitialize]
        );
    }

    #[test_timeout::timeout]
    fn abort_returns_to_idle_and_reset_clears_counters() {
        let mut sequencer = CaptureSequencer::new(3);
        sequencer.handle(SequenceInput::Request);
        assert_eq!(sequencer.handle(SequenceInput::Abort), vec![A::Finished]);
        assert!(sequencer.phase().is_idle());
        assert!(sequencer.handle(SequenceInput::Abort).is_empty());
        // A tick from the aborted countdown is out of phase.
        assert!(sequencer.handle(SequenceInput::Tick).is_empty());

        counted_down(&mut sequencer);
        sequencer.handle(SequenceInput::CaptureSucceeded { at: Utc::now() });
        let id = sequencer.sequence_id();
        sequencer.reset();
        assert_eq!(sequencer.capture_count(), 0);
        assert_eq!(sequencer.last_capture(), None);
        assert!(sequencer.phase().is_idle());
        assert_eq!(sequencer.sequence_id(), id);
    }
}

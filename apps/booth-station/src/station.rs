//! Pairing coordinator.
//!
//! A single task owns all station state. Relay events, device results, timer
//! firings and operator commands are funnelled into it and handled one at a
//! time, so no two transitions ever overlap.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use booth_channel::{ChannelError, RelayConnector};
use booth_proto::{ClientEvent, ImageData, Role, ServerEvent};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    capture::{CaptureEngine, DeviceOutcome, EngineHandle},
    config::SequenceTimings,
    connection::{ConnectionEffect, ConnectionEvent, ConnectionState},
    registry::{RegistryError, SessionManager},
    scheduler::{ScheduledTask, Scheduler},
    sequencer::{CaptureSequencer, SequenceAction, SequenceInput, SequencePhase},
    session::{RelaySignal, SessionContext, SessionInfo},
};

#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("station coordinator has stopped")]
    Stopped,
}

/// Everything a presenter needs to draw the station.
#[derive(Debug, Clone, Default)]
pub struct StationSnapshot {
    pub session: Option<SessionInfo>,
    pub connection: ConnectionState,
    pub phase: SequencePhase,
    /// Value currently shown on the countdown display.
    pub countdown: Option<u8>,
    pub capture_count: u64,
    pub last_capture: Option<DateTime<Utc>>,
    pub latest_image: Option<Arc<ImageData>>,
    pub device_acquired: bool,
    pub last_error: Option<String>,
    pub renewal_pending: bool,
}

enum Command {
    StartSession(oneshot::Sender<Result<SessionInfo, StationError>>),
    EndSession(oneshot::Sender<()>),
    CaptureNow(oneshot::Sender<bool>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Input {
    Relay { epoch: u64, signal: RelaySignal },
    Device(DeviceOutcome),
    Tick { sequence: u64 },
    CooldownElapsed { sequence: u64 },
    Renew { epoch: u64 },
}

#[derive(Clone)]
pub struct StationHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<StationSnapshot>,
    timings: SequenceTimings,
}

impl StationHandle {
    /// Request a fresh session and pair it. An active session is ended first
    /// without scheduling a renewal.
    pub async fn start_session(&self) -> Result<SessionInfo, StationError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartSession(reply))?;
        rx.await.map_err(|_| StationError::Stopped)?
    }

    /// Operator reset: same teardown as a relay-initiated end, renewal included.
    pub async fn end_session(&self) -> Result<(), StationError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EndSession(reply))?;
        rx.await.map_err(|_| StationError::Stopped)
    }

    /// Trigger a capture locally. Returns `false` when the request was ignored
    /// because no remote is paired or a sequence is already running.
    pub async fn capture_now(&self) -> Result<bool, StationError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CaptureNow(reply))?;
        rx.await.map_err(|_| StationError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), StationError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        rx.await.map_err(|_| StationError::Stopped)
    }

    pub fn snapshot(&self) -> StationSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StationSnapshot> {
        self.state.clone()
    }

    pub fn timings(&self) -> SequenceTimings {
        self.timings
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<StationSnapshot, StationError>
    where
        F: FnMut(&StationSnapshot) -> bool,
    {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| StationError::Stopped)?;
        Ok(snapshot.clone())
    }

    /// Write the latest captured image into `dir`. `Ok(None)` when there is
    /// nothing to save.
    pub async fn save_latest(&self, dir: &Path) -> Result<Option<PathBuf>, StationError> {
        let Some(image) = self.snapshot().latest_image else {
            return Ok(None);
        };
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("booth-photo-{millis}.{}", image.extension()));
        tokio::fs::write(&path, &image.bytes).await?;
        info!(path = %path.display(), "saved capture");
        Ok(Some(path))
    }

    fn send(&self, command: Command) -> Result<(), StationError> {
        self.commands.send(command).map_err(|_| StationError::Stopped)
    }
}

pub struct PairingCoordinator {
    sessions: SessionManager,
    connector: Arc<dyn RelayConnector>,
    device: EngineHandle,
    timings: SequenceTimings,
    inbox: mpsc::UnboundedSender<Input>,
    scheduler: Scheduler<Input>,
    state: watch::Sender<StationSnapshot>,

    context: Option<SessionContext>,
    epoch: u64,
    connection: ConnectionState,
    sequencer: CaptureSequencer,
    sequence_timer: Option<ScheduledTask>,
    renewal: Option<ScheduledTask>,
    countdown: Option<u8>,
    pending_image: Option<ImageData>,
    latest_image: Option<Arc<ImageData>>,
    device_acquired: bool,
    last_error: Option<String>,
}

impl PairingCoordinator {
    /// Start the coordinator task. No session is requested until
    /// [`StationHandle::start_session`] is called.
    pub fn spawn(
        sessions: SessionManager,
        connector: Arc<dyn RelayConnector>,
        engine: CaptureEngine,
        timings: SequenceTimings,
    ) -> StationHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StationSnapshot::default());

        let device_inbox = inbox_tx.clone();
        let device = EngineHandle::spawn(engine, move |outcome| {
            let _ = device_inbox.send(Input::Device(outcome));
        });

        let coordinator = PairingCoordinator {
            sessions,
            connector,
            device,
            timings,
            scheduler: Scheduler::new(inbox_tx.clone()),
            inbox: inbox_tx,
            state: state_tx,
            context: None,
            epoch: 0,
            connection: ConnectionState::NoRemote,
            sequencer: CaptureSequencer::new(timings.countdown_ticks),
            sequence_timer: None,
            renewal: None,
            countdown: None,
            pending_image: None,
            latest_image: None,
            device_acquired: false,
            last_error: None,
        };
        tokio::spawn(coordinator.run(commands_rx, inbox_rx));

        StationHandle {
            commands: commands_tx,
            state: state_rx,
            timings,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbox: mpsc::UnboundedReceiver<Input>,
    ) {
        let mut stopped = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        stopped = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(input) = inbox.recv() => self.handle_input(input).await,
            }
            self.publish();
        }

        self.renewal = None;
        if self.context.is_some() {
            self.teardown(false, true);
        }
        self.publish();
        let PairingCoordinator { device, .. } = self;
        device.shutdown().await;
        info!("station coordinator stopped");
        if let Some(reply) = stopped {
            let _ = reply.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartSession(reply) => {
                self.renewal = None;
                if self.context.is_some() {
                    info!("replacing active session");
                    self.teardown(false, true);
                }
                let result = self.open_session().await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::EndSession(reply) => {
                if self.context.is_some() {
                    self.teardown(true, true);
                }
                self.publish();
                let _ = reply.send(());
            }
            Command::CaptureNow(reply) => {
                let accepted = self.request_capture();
                self.publish();
                let _ = reply.send(accepted);
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Relay { epoch, signal } => {
                if self.context.as_ref().map(SessionContext::epoch) != Some(epoch) {
                    debug!(epoch, "dropping signal from a previous session");
                    return;
                }
                self.handle_relay(signal);
            }
            Input::Device(outcome) => self.handle_device(outcome),
            Input::Tick { sequence } => {
                if sequence == self.sequencer.sequence_id() {
                    self.drive(SequenceInput::Tick);
                }
            }
            Input::CooldownElapsed { sequence } => {
                if sequence == self.sequencer.sequence_id() {
                    self.drive(SequenceInput::CooldownElapsed);
                }
            }
            Input::Renew { epoch } => {
                if epoch != self.epoch || self.context.is_some() {
                    return;
                }
                self.renewal = None;
                info!("renewing session");
                if let Err(err) = self.open_session().await {
                    warn!(error = %err, "session renewal failed; waiting for operator");
                }
            }
        }
    }

    fn handle_relay(&mut self, signal: RelaySignal) {
        match signal {
            RelaySignal::Event(ServerEvent::RemoteJoined) => {
                info!(session_id = %self.session_label(), "remote joined");
                self.apply_connection(ConnectionEvent::RemoteJoined);
            }
            RelaySignal::Event(ServerEvent::RemoteLeft) => {
                info!(session_id = %self.session_label(), "remote left");
                self.apply_connection(ConnectionEvent::RemoteLeft);
            }
            RelaySignal::Event(ServerEvent::CaptureRequest) => {
                self.request_capture();
            }
            RelaySignal::Event(ServerEvent::SessionEnded { reason }) => {
                info!(session_id = %self.session_label(), ?reason, "session ended by relay");
                self.teardown(true, false);
            }
            RelaySignal::Event(ServerEvent::Error { message }) => {
                warn!(session_id = %self.session_label(), %message, "relay reported an error");
            }
            RelaySignal::Event(event) => {
                debug!(kind = event.kind(), "ignoring relay event");
            }
            RelaySignal::Closed => {
                warn!(session_id = %self.session_label(), "relay link lost");
                self.teardown(true, false);
            }
        }
    }

    fn handle_device(&mut self, outcome: DeviceOutcome) {
        match outcome {
            DeviceOutcome::Acquired(Ok(())) => self.device_acquired = true,
            DeviceOutcome::Acquired(Err(err)) => {
                // Capture will fall into recovery if the device is still missing.
                warn!(error = %err, "could not acquire capture device");
                self.device_acquired = false;
                self.last_error = Some(err.to_string());
            }
            DeviceOutcome::Released => self.device_acquired = false,
            DeviceOutcome::Captured { sequence, result } => {
                if sequence != self.sequencer.sequence_id() {
                    return;
                }
                match result {
                    Ok(image) => {
                        self.pending_image = Some(image);
                        self.drive(SequenceInput::CaptureSucceeded { at: Utc::now() });
                        self.pending_image = None;
                    }
                    Err(err) => {
                        warn!(error = %err, "capture attempt failed");
                        self.drive(SequenceInput::CaptureFailed {
                            message: err.to_string(),
                        });
                    }
                }
            }
            DeviceOutcome::Reinitialized { sequence, result } => {
                self.device_acquired = result.is_ok();
                if sequence != self.sequencer.sequence_id() {
                    return;
                }
                match result {
                    Ok(()) => self.drive(SequenceInput::RecoverySucceeded),
                    Err(err) => self.drive(SequenceInput::RecoveryFailed {
                        message: err.to_string(),
                    }),
                }
            }
        }
    }

    fn request_capture(&mut self) -> bool {
        if !self.connection.remote_present() {
            debug!("capture request without a paired remote ignored");
            return false;
        }
        let actions = self.sequencer.handle(SequenceInput::Request);
        if actions.is_empty() {
            debug!(phase = ?self.sequencer.phase(), "capture request while busy ignored");
            return false;
        }
        self.run_actions(actions);
        true
    }

    fn drive(&mut self, input: SequenceInput) {
        let actions = self.sequencer.handle(input);
        self.run_actions(actions);
    }

    fn run_actions(&mut self, actions: Vec<SequenceAction>) {
        let sequence = self.sequencer.sequence_id();
        for action in actions {
            match action {
                SequenceAction::Started => {
                    self.last_error = None;
                    self.apply_connection(ConnectionEvent::SequenceStarted);
                }
                SequenceAction::ShowCountdown(remaining) => {
                    info!(remaining, "countdown");
                    self.countdown = Some(remaining);
                }
                SequenceAction::ScheduleTick => {
                    self.sequence_timer = Some(
                        self.scheduler
                            .schedule(self.timings.tick, Input::Tick { sequence }),
                    );
                }
                SequenceAction::InvokeCapture => {
                    self.countdown = None;
                    self.device.capture(sequence);
                }
                SequenceAction::Reinitialize => self.device.reinitialize(sequence),
                SequenceAction::PublishImage => self.publish_image(),
                SequenceAction::EmitDeviceError(message) => {
                    warn!(%message, "capture gave up after recovery");
                    self.last_error = Some(message.clone());
                    self.send_to_relay(|session_id| ClientEvent::DeviceError {
                        session_id,
                        message,
                    });
                }
                SequenceAction::ScheduleCooldown => {
                    self.sequence_timer = Some(self.scheduler.schedule(
                        self.timings.cooldown,
                        Input::CooldownElapsed { sequence },
                    ));
                }
                SequenceAction::Finished => {
                    self.sequence_timer = None;
                    self.countdown = None;
                    self.apply_connection(ConnectionEvent::SequenceFinished);
                }
            }
        }
    }

    fn publish_image(&mut self) {
        let Some(image) = self.pending_image.take() else {
            return;
        };
        let image = Arc::new(image);
        info!(
            session_id = %self.session_label(),
            bytes = image.bytes.len(),
            count = self.sequencer.capture_count(),
            "capture published"
        );
        let image_data = image.to_data_url();
        self.latest_image = Some(image);
        self.send_to_relay(|session_id| ClientEvent::ImageCaptured {
            session_id,
            image_data,
        });
    }

    fn apply_connection(&mut self, event: ConnectionEvent) {
        let (next, effects) = self.connection.transition(event);
        self.connection = next;
        for effect in effects {
            match effect {
                ConnectionEffect::AcquireDevice => self.device.acquire(),
                ConnectionEffect::ReleaseDevice => self.device.release(),
                ConnectionEffect::DiscardImage => {
                    self.latest_image = None;
                    self.pending_image = None;
                }
                ConnectionEffect::AbortSequence => self.drive(SequenceInput::Abort),
            }
        }
    }

    async fn open_session(&mut self) -> Result<SessionInfo, StationError> {
        let result = self.try_open_session().await;
        match &result {
            Ok(info) => {
                self.last_error = None;
                info!(
                    session_id = %info.session_id,
                    pairing_url = %info.pairing_url,
                    "session ready for pairing"
                );
            }
            Err(err) => self.last_error = Some(err.to_string()),
        }
        result
    }

    async fn try_open_session(&mut self) -> Result<SessionInfo, StationError> {
        let ticket = self.sessions.generate().await?;
        let link = self
            .connector
            .join(&ticket.session_id, Role::Station)
            .await?;

        self.epoch += 1;
        let inbox = self.inbox.clone();
        let context = SessionContext::open(ticket, link, self.epoch, move |epoch, signal| {
            let _ = inbox.send(Input::Relay { epoch, signal });
        });
        let info = context.info().clone();
        self.connection = ConnectionState::NoRemote;
        self.context = Some(context);
        Ok(info)
    }

    /// Abort whatever is running, release the device and forget the session.
    /// `notify_relay` is set when the station itself ends the session.
    fn teardown(&mut self, renew: bool, notify_relay: bool) {
        self.sequence_timer = None;
        self.renewal = None;
        self.apply_connection(ConnectionEvent::SessionEnded);
        self.sequencer.reset();
        self.countdown = None;

        if let Some(context) = self.context.take() {
            info!(session_id = %context.session_id(), renew, "session torn down");
            context.dispose(notify_relay);
        }
        self.epoch += 1;

        if renew {
            self.renewal = Some(self.scheduler.schedule(
                self.timings.renewal_delay,
                Input::Renew { epoch: self.epoch },
            ));
        }
    }

    fn send_to_relay<F>(&self, build: F)
    where
        F: FnOnce(String) -> ClientEvent,
    {
        let Some(context) = &self.context else {
            return;
        };
        let event = build(context.session_id().to_string());
        if let Err(err) = context.send(event) {
            warn!(session_id = %context.session_id(), error = %err, "relay send failed");
        }
    }

    fn session_label(&self) -> &str {
        self.context
            .as_ref()
            .map(SessionContext::session_id)
            .unwrap_or("-")
    }

    fn publish(&self) {
        let snapshot = StationSnapshot {
            session: self.context.as_ref().map(|context| context.info().clone()),
            connection: self.connection,
            phase: self.sequencer.phase(),
            countdown: self.countdown,
            capture_count: self.sequencer.capture_count(),
            last_capture: self.sequencer.last_capture(),
            latest_image: self.latest_image.clone(),
            device_acquired: self.device_acquired,
            last_error: self.last_error.clone(),
            renewal_pending: self.renewal.is_some(),
        };
        self.state.send_replace(snapshot);
    }
}

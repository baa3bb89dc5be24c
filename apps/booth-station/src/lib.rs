//! Capture station for a remote-triggered photo booth.
//!
//! The station requests a session from the registry, shows its pairing code,
//! and waits for a handheld remote to join over the relay. Each capture
//! request from the remote runs a countdown, grabs a frame from the capture
//! device and sends the still back to the remote.

pub mod batch;
pub mod capture;
pub mod config;
pub mod connection;
pub mod presenter;
pub mod registry;
pub mod scheduler;
pub mod sequencer;
pub mod session;
pub mod station;
pub mod telemetry;

pub use batch::BatchReport;
pub use config::{Cli, DeviceSelection, SequenceTimings, StationConfig};
pub use station::{PairingCoordinator, StationError, StationHandle, StationSnapshot};

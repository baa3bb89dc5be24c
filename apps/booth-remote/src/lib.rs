//! Handheld remote for a paired photo booth.
//!
//! The remote reads a station's pairing link, joins that session on the relay
//! and sends capture requests. Photos and device errors come back as
//! [`RemoteEvent`]s.

pub mod config;
pub mod remote;
pub mod telemetry;

pub use config::{Cli, RemoteConfig};
pub use remote::{RemoteCoordinator, RemoteError, RemoteEvent, RemoteState};

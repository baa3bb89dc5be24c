//! Message shapes exchanged between the capture station, the handheld remote,
//! and the session relay. Keeping them in one crate stops the three parties
//! from drifting apart on field names.

pub mod events;
pub mod image;
pub mod pairing;
pub mod registry;

pub use events::{ClientEvent, EndReason, Role, ServerEvent};
pub use image::{ImageData, ImageDataError};
pub use pairing::{
    pairing_url, relay_url_for, session_id_from_url, validate_session_id, PairingError,
};
pub use registry::{GenerateSessionResponse, STATUS_ERROR, STATUS_SUCCESS};

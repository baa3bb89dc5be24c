//! Terminal rendering of the station state.

use qrcode::{render::unicode::Dense1x2, types::QrError, QrCode};
use tokio::sync::watch;

use crate::{connection::ConnectionState, sequencer::SequencePhase, station::StationSnapshot};

pub fn render_qr(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// One-line status for the operator.
pub fn status_line(snapshot: &StationSnapshot) -> String {
    let session = snapshot
        .session
        .as_ref()
        .map(|session| session.session_id.as_str())
        .unwrap_or("none");
    let remote = match snapshot.connection {
        ConnectionState::NoRemote => "waiting for remote",
        ConnectionState::Connected => "remote connected",
        ConnectionState::InSequence => "capturing",
    };
    let phase = match snapshot.phase {
        SequencePhase::Idle => "ready".to_string(),
        SequencePhase::Countdown { remaining } => format!("countdown {remaining}"),
        SequencePhase::Capturing => "smile!".to_string(),
        SequencePhase::Recovering => "restarting camera".to_string(),
        SequencePhase::Cooldown => "just captured".to_string(),
    };
    let mut line = format!(
        "[session {session}] {remote} | {phase} | photos: {}",
        snapshot.capture_count
    );
    if snapshot.renewal_pending {
        line.push_str(" | renewing session");
    }
    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!(" | error: {error}"));
    }
    line
}

/// Print the pairing code whenever the session changes and a status line
/// whenever anything else does. Returns when the station stops.
pub async fn run(mut state: watch::Receiver<StationSnapshot>) {
    let mut shown_session = None;
    let mut last_line = String::new();
    loop {
        let snapshot = state.borrow_and_update().clone();
        let session_id = snapshot.session.as_ref().map(|s| s.session_id.clone());
        if session_id != shown_session {
            if let Some(session) = &snapshot.session {
                match render_qr(session.pairing_url.as_str()) {
                    Ok(qr) => println!("{qr}"),
                    Err(err) => tracing::warn!(error = %err, "could not render pairing code"),
                }
                println!("Scan to pair: {}", session.pairing_url);
            }
            shown_session = session_id;
        }
        let line = status_line(&snapshot);
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
        if state.changed().await.is_err() {
            break;
        }
    }
}

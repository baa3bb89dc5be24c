//! Multi-shot capture: a station-side loop over the single-shot sequence.

use serde::Serialize;
use tracing::info;

use crate::station::{StationError, StationHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub requested: u32,
    pub captured: u32,
    pub failed: u32,
    /// Shots never started because the request was refused, for example
    /// after the remote left mid-batch.
    pub not_started: u32,
}

impl StationHandle {
    /// Run `count` captures back to back. Each shot starts only after the
    /// previous sequence has returned to idle and the settle interval passed.
    pub async fn capture_batch(&self, count: u32) -> Result<BatchReport, StationError> {
        let settle = self.timings().batch_settle;
        let mut report = BatchReport {
            requested: count,
            ..BatchReport::default()
        };

        for shot in 0..count {
            if shot > 0 {
                tokio::time::sleep(settle).await;
            }
            let before = self.wait_until(|state| state.phase.is_idle()).await?;
            if !self.capture_now().await? {
                report.not_started = count - shot;
                break;
            }
            let after = self.wait_until(|state| state.phase.is_idle()).await?;
            let same_session = before.session.as_ref().map(|s| &s.session_id)
                == after.session.as_ref().map(|s| &s.session_id);
            if same_session && after.capture_count > before.capture_count {
                report.captured += 1;
            } else {
                report.failed += 1;
            }
            info!(shot = shot + 1, of = count, "batch shot finished");
        }

        Ok(report)
    }
}

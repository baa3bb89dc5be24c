//! Capture engine: owns the image-producing device and turns frames into
//! encoded stills.

use std::sync::Arc;

use async_trait::async_trait;
use booth_proto::ImageData;
use image::RgbaImage;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::config::DeviceSelection;

mod devices;
mod overlay;
#[cfg(any(feature = "webcam", test))]
mod thread;
#[cfg(feature = "webcam")]
mod webcam;

pub use devices::{StillImageDevice, TestPatternDevice};
pub use overlay::{encode_jpeg, encode_png, Overlay, JPEG_QUALITY};
#[cfg(feature = "webcam")]
pub use webcam::WebcamDevice;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("capture device has not been acquired")]
    NotAcquired,
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("image processing failed: {0}")]
    Image(String),
}

/// Something that produces frames. Implementations must tolerate repeated
/// `open`/`close` calls.
#[async_trait]
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;
    fn is_open(&self) -> bool;
    async fn open(&mut self) -> Result<(), DeviceError>;
    async fn close(&mut self);
    async fn grab(&mut self) -> Result<RgbaImage, DeviceError>;
}

pub fn open_device(selection: &DeviceSelection) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    match selection {
        DeviceSelection::TestPattern { width, height } => {
            Ok(Box::new(TestPatternDevice::new(*width, *height)))
        }
        DeviceSelection::StillImage(path) => Ok(Box::new(StillImageDevice::new(path.clone()))),
        #[cfg(feature = "webcam")]
        DeviceSelection::Webcam { index } => Ok(Box::new(WebcamDevice::new(*index))),
        #[cfg(not(feature = "webcam"))]
        DeviceSelection::Webcam { .. } => Err(DeviceError::Unavailable(
            "built without the `webcam` feature".into(),
        )),
    }
}

pub struct CaptureEngine {
    device: Box<dyn CaptureDevice>,
    overlay: Option<Arc<Overlay>>,
}

impl CaptureEngine {
    pub fn new(device: Box<dyn CaptureDevice>, overlay: Option<Overlay>) -> Self {
        Self {
            device,
            overlay: overlay.map(Arc::new),
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.device.is_open()
    }

    pub async fn acquire(&mut self) -> Result<(), DeviceError> {
        if self.device.is_open() {
            return Ok(());
        }
        self.device.open().await?;
        info!(device = self.device.name(), "capture device acquired");
        Ok(())
    }

    pub async fn release(&mut self) {
        if !self.device.is_open() {
            return;
        }
        self.device.close().await;
        info!(device = self.device.name(), "capture device released");
    }

    pub async fn reinitialize(&mut self) -> Result<(), DeviceError> {
        warn!(device = self.device.name(), "re-initialising capture device");
        self.device.close().await;
        self.device.open().await
    }

    /// Grab one frame and encode it: PNG when composited with the overlay,
    /// JPEG otherwise. Compositing and encoding run on the blocking pool.
    pub async fn capture(&mut self) -> Result<ImageData, DeviceError> {
        if !self.device.is_open() {
            return Err(DeviceError::NotAcquired);
        }
        let frame = self.device.grab().await?;
        let overlay = self.overlay.clone();
        tokio::task::spawn_blocking(move || encode_frame(&frame, overlay.as_deref()))
            .await
            .map_err(|err| DeviceError::Image(format!("encoder task failed: {err}")))?
    }
}

fn encode_frame(frame: &RgbaImage, overlay: Option<&Overlay>) -> Result<ImageData, DeviceError> {
    match overlay {
        Some(overlay) => {
            let composed = overlay.compose(frame);
            Ok(ImageData::new(booth_proto::image::MIME_PNG, encode_png(&composed)?))
        }
        None => Ok(ImageData::new(
            booth_proto::image::MIME_JPEG,
            encode_jpeg(frame, JPEG_QUALITY)?,
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceCommand {
    Acquire,
    Release,
    Capture { sequence: u64 },
    Reinitialize { sequence: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    Acquired(Result<(), DeviceError>),
    Released,
    Captured {
        sequence: u64,
        result: Result<ImageData, DeviceError>,
    },
    Reinitialized {
        sequence: u64,
        result: Result<(), DeviceError>,
    },
}

/// Runs the engine on its own task. Commands execute strictly in the order
/// they were issued, so a release can never overtake an acquire.
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<DeviceCommand>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn spawn<F>(mut engine: CaptureEngine, report: F) -> Self
    where
        F: Fn(DeviceOutcome) + Send + 'static,
    {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                debug!(?command, "device command");
                let outcome = match command {
                    DeviceCommand::Acquire => DeviceOutcome::Acquired(engine.acquire().await),
                    DeviceCommand::Release => {
                        engine.release().await;
                        DeviceOutcome::Released
                    }
                    DeviceCommand::Capture { sequence } => DeviceOutcome::Captured {
                        sequence,
                        result: engine.capture().await,
                    },
                    DeviceCommand::Reinitialize { sequence } => DeviceOutcome::Reinitialized {
                        sequence,
                        result: engine.reinitialize().await,
                    },
                };
                report(outcome);
            }
            engine.release().await;
        });
        Self { commands, task }
    }

    pub fn acquire(&self) {
        let _ = self.commands.send(DeviceCommand::Acquire);
    }

    pub fn release(&self) {
        let _ = self.commands.send(DeviceCommand::Release);
    }

    pub fn capture(&self, sequence: u64) {
        let _ = self.commands.send(DeviceCommand::Capture { sequence });
    }

    pub fn reinitialize(&self, sequence: u64) {
        let _ = self.commands.send(DeviceCommand::Reinitialize { sequence });
    }

    /// Finish queued work, release the device and stop the worker.
    pub async fn shutdown(self) {
        let EngineHandle { commands, task } = self;
        drop(commands);
        let _ = task.await;
    }
}

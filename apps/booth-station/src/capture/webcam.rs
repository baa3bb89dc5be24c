use async_trait::async_trait;
use image::RgbaImage;
use nokhwa::{
    pixel_format::RgbAFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::{info, warn};

use super::{
    thread::{BlockingCamera, DeviceThread},
    CaptureDevice, DeviceError,
};

/// USB/built-in camera via nokhwa. The camera handle is not `Send`, so it
/// lives on a dedicated thread for as long as the device is open.
pub struct WebcamDevice {
    index: u32,
    name: String,
    worker: DeviceThread,
}

impl WebcamDevice {
    pub fn new(index: u32) -> Self {
        let name = format!("webcam-{index}");
        Self {
            index,
            worker: DeviceThread::new(name.clone()),
            name,
        }
    }
}

struct NokhwaCamera {
    index: u32,
    camera: Camera,
}

fn open_camera(index: u32) -> Result<Camera, DeviceError> {
    let requested =
        RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => camera,
        Err(err) => {
            warn!(index, error = %err, "highest resolution unavailable; using camera default");
            let fallback = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
            Camera::new(CameraIndex::Index(index), fallback)
                .map_err(|err| DeviceError::Unavailable(err.to_string()))?
        }
    };
    camera
        .open_stream()
        .map_err(|err| DeviceError::Unavailable(err.to_string()))?;
    Ok(camera)
}

impl BlockingCamera for NokhwaCamera {
    fn grab(&mut self) -> Result<RgbaImage, DeviceError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|err| DeviceError::CaptureFailed(err.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbAFormat>()
            .map_err(|err| DeviceError::CaptureFailed(err.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        RgbaImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| DeviceError::CaptureFailed("frame buffer size mismatch".into()))
    }

    fn stop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            warn!(index = self.index, error = %err, "failed to stop camera stream");
        }
    }
}

#[async_trait]
impl CaptureDevice for WebcamDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.worker.is_running()
    }

    async fn open(&mut self) -> Result<(), DeviceError> {
        if self.worker.is_running() {
            return Ok(());
        }
        let index = self.index;
        self.worker
            .start(move || open_camera(index).map(|camera| NokhwaCamera { index, camera }))
            .await?;
        info!(index, "webcam stream opened");
        Ok(())
    }

    async fn close(&mut self) {
        self.worker.stop().await;
    }

    async fn grab(&mut self) -> Result<RgbaImage, DeviceError> {
        self.worker.grab().await
    }
}

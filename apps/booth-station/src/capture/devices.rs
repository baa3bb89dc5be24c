use std::path::PathBuf;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use super::{CaptureDevice, DeviceError};

/// Synthetic colour-bar source for demos and headless stations. Each frame
/// shifts the bars so consecutive captures differ.
pub struct TestPatternDevice {
    width: u32,
    height: u32,
    open: bool,
    frame: u32,
}

const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

impl TestPatternDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            open: false,
            frame: 0,
        }
    }
}

#[async_trait]
impl CaptureDevice for TestPatternDevice {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<(), DeviceError> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    async fn grab(&mut self) -> Result<RgbaImage, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotAcquired);
        }
        self.frame = self.frame.wrapping_add(1);
        let bar_width = (self.width / BARS.len() as u32).max(1);
        let offset = self.frame as usize;
        Ok(RgbaImage::from_fn(self.width, self.height, |x, _| {
            let bar = ((x / bar_width) as usize + offset) % BARS.len();
            let [r, g, b] = BARS[bar];
            Rgba([r, g, b, 255])
        }))
    }
}

/// Serves the same decoded image for every capture.
pub struct StillImageDevice {
    path: PathBuf,
    image: Option<RgbaImage>,
}

impl StillImageDevice {
    pub fn new(path: PathBuf) -> Self {
        Self { path, image: None }
    }
}

#[async_trait]
impl CaptureDevice for StillImageDevice {
    fn name(&self) -> &str {
        "still-image"
    }

    fn is_open(&self) -> bool {
        self.image.is_some()
    }

    async fn open(&mut self) -> Result<(), DeviceError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|err| {
            DeviceError::Unavailable(format!("{}: {err}", self.path.display()))
        })?;
        let image = image::load_from_memory(&bytes)
            .map_err(|err| DeviceError::Image(format!("{}: {err}", self.path.display())))?
            .into_rgba8();
        self.image = Some(image);
        Ok(())
    }

    async fn close(&mut self) {
        self.image = None;
    }

    async fn grab(&mut self) -> Result<RgbaImage, DeviceError> {
        self.image.clone().ok_or(DeviceError::NotAcquired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test]
    async fn test_pattern_requires_open_and_varies() {
        let mut device = TestPatternDevice::new(70, 10);
        assert_eq!(device.grab().await, Err(DeviceError::NotAcquired));

        device.open().await.unwrap();
        let first = device.grab().await.unwrap();
        let second = device.grab().await.unwrap();
        assert_eq!(first.dimensions(), (70, 10));
        assert_ne!(first, second);
    }

    #[test_timeout::tokio_timeout_test]
    async fn still_image_reports_missing_file() {
        let path = std::env::temp_dir().join(format!(
            "booth-missing-{}.png",
            uuid::Uuid::new_v4().simple()
        ));
        let mut device = StillImageDevice::new(path);
        assert!(matches!(
            device.open().await,
            Err(DeviceError::Unavailable(_))
        ));
        assert!(!device.is_open());
    }

    #[test_timeout::tokio_timeout_test]
    async fn still_image_round_trips_file() {
        let path = std::env::temp_dir().join(format!(
            "booth-still-{}.png",
            uuid::Uuid::new_v4().simple()
        ));
        let source = RgbaImage::from_pixel(5, 4, Rgba([9, 8, 7, 255]));
        source.save(&path).unwrap();

        let mut device = StillImageDevice::new(path.clone());
        device.open().await.unwrap();
        assert_eq!(device.grab().await.unwrap(), source);
        device.close().await;
        assert_eq!(device.grab().await, Err(DeviceError::NotAcquired));
        let _ = std::fs::remove_file(path);
    }
}

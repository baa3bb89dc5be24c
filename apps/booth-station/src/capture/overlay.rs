use std::{io::Cursor, path::Path};

use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    imageops::{self, FilterType},
    ColorType, DynamicImage, ImageEncoder, RgbaImage,
};

use super::DeviceError;

pub const JPEG_QUALITY: u8 = 80;

/// A frame overlay (border, logo, props) composited over every capture.
/// Stretched to the frame size, so artwork should match the camera's aspect.
#[derive(Debug, Clone)]
pub struct Overlay {
    image: RgbaImage,
}

impl Overlay {
    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        let image = image::open(path)
            .map_err(|err| DeviceError::Image(format!("overlay {}: {err}", path.display())))?
            .into_rgba8();
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn compose(&self, frame: &RgbaImage) -> RgbaImage {
        let mut composed = frame.clone();
        if self.image.dimensions() == frame.dimensions() {
            imageops::overlay(&mut composed, &self.image, 0, 0);
        } else {
            let scaled = imageops::resize(
                &self.image,
                frame.width(),
                frame.height(),
                FilterType::Triangle,
            );
            imageops::overlay(&mut composed, &scaled, 0, 0);
        }
        composed
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, DeviceError> {
    let mut bytes = Vec::new();
    PngEncoder::new(Cursor::new(&mut bytes))
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|err| DeviceError::Image(format!("png encode: {err}")))?;
    Ok(bytes)
}

/// JPEG has no alpha channel; it is dropped before encoding.
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, DeviceError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|err| DeviceError::Image(format!("jpeg encode: {err}")))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test_timeout::timeout]
    fn opaque_overlay_pixels_win() {
        let frame = RgbaImage::from_pixel(8, 6, Rgba([0, 0, 255, 255]));
        let mut art = RgbaImage::from_pixel(8, 6, Rgba([0, 0, 0, 0]));
        art.put_pixel(1, 1, Rgba([255, 0, 0, 255]));

        let composed = Overlay::from_image(art).compose(&frame);
        assert_eq!(composed.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(composed.get_pixel(5, 5), &Rgba([0, 0, 255, 255]));
    }

    #[test_timeout::timeout]
    fn overlay_is_scaled_to_frame() {
        let frame = RgbaImage::from_pixel(16, 12, Rgba([0, 0, 0, 255]));
        let art = RgbaImage::from_pixel(4, 3, Rgba([255, 255, 255, 255]));
        let composed = Overlay::from_image(art).compose(&frame);
        assert_eq!(composed.dimensions(), (16, 12));
        assert_eq!(composed.get_pixel(15, 11), &Rgba([255, 255, 255, 255]));
    }

    #[test_timeout::timeout]
    fn encoders_emit_their_magic_bytes() {
        let frame = RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 255]));
        assert_eq!(&encode_png(&frame).unwrap()[..4], &[0x89, b'P', b'N', b'G']);
        assert_eq!(&encode_jpeg(&frame, JPEG_QUALITY).unwrap()[..2], &[0xFF, 0xD8]);
    }
}

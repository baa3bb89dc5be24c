use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

/// An encoded still image as carried in `image_captured` events.
///
/// On the wire the image travels as a `data:` URL so browser remotes can
/// display it without further decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageDataError {
    #[error("image payload is not a data url")]
    NotDataUrl,
    #[error("image payload is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 image payload: {0}")]
    InvalidBase64(String),
    #[error("image payload is empty")]
    Empty,
}

impl ImageData {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn from_data_url(raw: &str) -> Result<Self, ImageDataError> {
        let rest = raw
            .trim()
            .strip_prefix("data:")
            .ok_or(ImageDataError::NotDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(ImageDataError::NotDataUrl)?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or(ImageDataError::NotBase64)?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|err| ImageDataError::InvalidBase64(err.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageDataError::Empty);
        }
        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }

    /// File extension matching the mime type.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            MIME_PNG => "png",
            MIME_JPEG => "jpg",
            _ => "bin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn data_url_carries_mime_and_payload() {
        let image = ImageData::new(MIME_PNG, vec![0x89, b'P', b'N', b'G']);
        let url = image.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(ImageData::from_data_url(&url).unwrap(), image);
        assert_eq!(image.extension(), "png");
    }

    #[test_timeout::timeout]
    fn rejects_non_data_urls() {
        assert_eq!(
            ImageData::from_data_url("https://example.com/a.png"),
            Err(ImageDataError::NotDataUrl)
        );
        assert_eq!(
            ImageData::from_data_url("data:image/png,plain"),
            Err(ImageDataError::NotBase64)
        );
        assert!(matches!(
            ImageData::from_data_url("data:image/png;base64,@@@"),
            Err(ImageDataError::InvalidBase64(_))
        ));
        assert_eq!(
            ImageData::from_data_url("data:image/jpeg;base64,"),
            Err(ImageDataError::Empty)
        );
    }
}

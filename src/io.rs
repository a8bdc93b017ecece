use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::TiledImage;
use crate::error::{EngineResult, PayloadError};

// ============================================================================
// SAVED PAYLOAD - ink layer as a PNG data URL
// ============================================================================

pub const PAYLOAD_PREFIX: &str = "data:image/png;base64,";

/// Opaque saved-ink payload handed to the persistence layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImagePayload(String);

impl ImagePayload {
    pub fn from_string(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// PNG-encode an RGBA image into memory.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, PayloadError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)?;
    Ok(buf)
}

pub fn encode_image_payload(image: &RgbaImage) -> Result<ImagePayload, PayloadError> {
    let png = encode_png(image)?;
    Ok(ImagePayload(format!("{}{}", PAYLOAD_PREFIX, STANDARD.encode(png))))
}

/// Serialise an ink layer. Transparent pixels stay transparent.
pub fn encode_payload(ink: &TiledImage) -> Result<ImagePayload, PayloadError> {
    encode_image_payload(&ink.to_rgba_image())
}

/// Decode a payload back to RGBA pixels.
pub fn decode_payload(payload: &ImagePayload) -> Result<RgbaImage, PayloadError> {
    let data = payload.as_str().trim();
    let encoded = data.strip_prefix(PAYLOAD_PREFIX).ok_or(PayloadError::MissingPrefix)?;
    let bytes = STANDARD.decode(encoded)?;
    let image = image::load_from_memory(&bytes)?.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(PayloadError::Empty { width: image.width(), height: image.height() });
    }
    Ok(image)
}

// ============================================================================
// FILES
// ============================================================================

/// Load any image format the `image` crate was built with.
pub fn load_image(path: &Path) -> EngineResult<RgbaImage> {
    let reader = image::io::Reader::new(BufReader::new(File::open(path)?))
        .with_guessed_format()?;
    let image = reader.decode().map_err(PayloadError::from)?.to_rgba8();
    Ok(image)
}

pub fn write_png(image: &RgbaImage, path: &Path) -> EngineResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    PngEncoder::new(&mut writer)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(PayloadError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn payload_keeps_ink_pixels() {
        let mut ink = TiledImage::new(90, 40);
        ink.put_pixel(80, 30, Rgba([10, 20, 30, 200]));
        let payload = encode_payload(&ink).unwrap();
        assert!(payload.as_str().starts_with(PAYLOAD_PREFIX));
        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.dimensions(), (90, 40));
        assert_eq!(*decoded.get_pixel(80, 30), Rgba([10, 20, 30, 200]));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn rejects_foreign_payloads() {
        let err = decode_payload(&ImagePayload::from_string("hello")).unwrap_err();
        assert!(matches!(err, PayloadError::MissingPrefix));
        let err = decode_payload(&ImagePayload::from_string(format!("{PAYLOAD_PREFIX}%%%"))).unwrap_err();
        assert!(matches!(err, PayloadError::Base64(_)));
        let not_png = format!("{PAYLOAD_PREFIX}{}", STANDARD.encode(b"plain text"));
        let err = decode_payload(&ImagePayload::from_string(not_png)).unwrap_err();
        assert!(matches!(err, PayloadError::Image(_)));
    }

    #[test]
    fn png_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        write_png(&img, &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), img);
    }

    #[test]
    fn payload_serializes_as_plain_string() {
        let payload = ImagePayload::from_string("data:image/png;base64,AAAA");
        assert_eq!(serde_json::to_string(&payload).unwrap(), "\"data:image/png;base64,AAAA\"");
    }
}

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use tracing::{debug, instrument};

use crate::capabilities::camera::{CapturedFrame, FrameData};
use crate::model::StillImage;
use crate::{ImageError, MAX_FRAME_DIMENSION};

/// Formats the vision service accepts inline.
#[must_use]
pub fn mime_type_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// Detects the format from magic bytes, ignoring file names and declared types.
pub fn sniff_mime_type(bytes: &[u8]) -> Result<&'static str, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    image::guess_format(bytes)
        .ok()
        .and_then(mime_type_for)
        .ok_or(ImageError::UnsupportedFormat)
}

/// Validates an uploaded file and prepares it for preview and analysis.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn still_from_upload(bytes: &[u8], max_bytes: usize) -> Result<StillImage, ImageError> {
    if bytes.len() > max_bytes {
        return Err(ImageError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    let mime_type = sniff_mime_type(bytes)?;
    debug!(mime_type, "upload accepted");
    Ok(StillImage::new(mime_type, BASE64.encode(bytes), bytes.len()))
}

/// Turns a grabbed video frame into a still, encoding raw pixels as JPEG.
#[instrument(skip(frame), fields(captured_at_ms = frame.captured_at_ms))]
pub fn still_from_frame(frame: CapturedFrame, jpeg_quality: u8) -> Result<StillImage, ImageError> {
    match frame.data {
        FrameData::Encoded { bytes, mime_type } => {
            let sniffed = sniff_mime_type(&bytes)?;
            if sniffed != mime_type {
                debug!(declared = %mime_type, sniffed, "frame mime type corrected");
            }
            Ok(StillImage::new(sniffed, BASE64.encode(&bytes), bytes.len()))
        }
        FrameData::Rgba {
            width,
            height,
            pixels,
        } => {
            let jpeg = encode_rgba_as_jpeg(width, height, pixels, jpeg_quality)?;
            Ok(StillImage::new("image/jpeg", BASE64.encode(&jpeg), jpeg.len()))
        }
    }
}

pub fn encode_rgba_as_jpeg(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    quality: u8,
) -> Result<Vec<u8>, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidFrame(format!(
            "zero-sized frame {width}x{height}"
        )));
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(ImageError::DimensionsTooLarge {
            width,
            height,
            max: MAX_FRAME_DIMENSION,
        });
    }

    let actual = pixels.len();
    let rgba = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        ImageError::InvalidFrame(format!(
            "{actual} bytes do not cover a {width}x{height} RGBA frame"
        ))
    })?;
    let rgb = image::DynamicImage::ImageRgba8(rgba).into_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
    Ok(out.into_inner())
}

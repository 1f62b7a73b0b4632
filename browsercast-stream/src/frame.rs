//! Decoded video frames

use bytes::Bytes;
use image::GenericImageView;
use std::time::Duration;

use crate::clock::TimeBase;
use crate::error::{Result, StreamError};

/// Raw RGB24 raster ready for encoding
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB, `width * height * 3` bytes
    pub data: Bytes,
    /// Presentation timestamp in `time_base` units
    pub pts: u64,
    pub time_base: TimeBase,
    /// Nominal display duration
    pub duration: Duration,
}

/// Raster produced by [`decode_image`], not yet stamped
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Bytes,
}

/// Decode a compressed screencast image (JPEG or PNG).
///
/// 4:2:0 encoders need even dimensions, so an odd trailing row or column is cropped.
pub fn decode_image(data: &[u8]) -> Result<DecodedImage> {
    if data.is_empty() {
        return Err(StreamError::Decode("empty payload".to_string()));
    }

    let mut image =
        image::load_from_memory(data).map_err(|e| StreamError::Decode(e.to_string()))?;

    let (width, height) = image.dimensions();
    let (even_width, even_height) = (width & !1, height & !1);
    if even_width == 0 || even_height == 0 {
        return Err(StreamError::Decode(format!(
            "image too small: {width}x{height}"
        )));
    }
    if (even_width, even_height) != (width, height) {
        image = image.crop_imm(0, 0, even_width, even_height);
    }

    Ok(DecodedImage {
        width: even_width,
        height: even_height,
        rgb: Bytes::from(image.to_rgb8().into_raw()),
    })
}

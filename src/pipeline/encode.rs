//! Image encoding: enhanced `DynamicImage` → base64 PNG.
//!
//! The enhanced image is near-binary; PNG compresses it to a fraction of a
//! JPEG's size and, being lossless, keeps the thin pen strokes the model
//! has to read. JPEG ringing around high-contrast edges is exactly the
//! artefact the sharpening stage tried to remove.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type of every encoded image.
pub const IMAGE_MIME: &str = "image/png";

/// A PNG, base64-encoded for a multimodal request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Serialise an image as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode the enhanced prescription as a base64 PNG.
pub fn encode_image(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let png = png_bytes(img)?;
    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} image → {} PNG bytes, {} bytes base64",
        img.width(),
        img.height(),
        png.len(),
        b64.len()
    );

    Ok(EncodedImage {
        base64: b64,
        mime_type: IMAGE_MIME,
        width: img.width(),
        height: img.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn encode_gray_image() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 12, Luma([255])));
        let data = encode_image(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!((data.width, data.height), (10, 12));
        let decoded = STANDARD.decode(&data.base64).expect("valid base64");
        assert_eq!(&decoded[..4], b"\x89PNG");
    }

    #[test]
    fn png_round_trips_pixels() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(4, 4, |x, _| Luma([(x * 60) as u8])));
        let bytes = png_bytes(&img).unwrap();
        let back = image::load_from_memory(&bytes).unwrap();
        assert_eq!(back.to_luma8().as_raw(), img.to_luma8().as_raw());
    }
}

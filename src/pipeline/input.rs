//! Input resolution: a user-supplied path or URL → decoded image.
//!
//! Bytes are sniffed before decoding so a PDF or GIF handed in by mistake
//! gets a clear "not a JPEG or PNG" error with the first bytes shown,
//! instead of a decoder message about a corrupt header.

use crate::error::MediscriptError;
use image::{DynamicImage, ImageFormat};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

/// A decoded input image and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The path or URL as given.
    pub source: String,
    pub format: ImageFormat,
    pub image: DynamicImage,
    /// Size of the encoded input in bytes.
    pub byte_len: usize,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read and decode the image at `input` (local path or HTTP/HTTPS URL).
pub async fn load_image(input: &str, download_timeout_secs: u64) -> Result<LoadedImage, MediscriptError> {
    let bytes = read_source(input, download_timeout_secs).await?;
    let format = sniff_format(&bytes).ok_or_else(|| unsupported(input, &bytes))?;
    let image = decode_image_bytes(&bytes, input)?;
    debug!(
        "Decoded {:?} {}x{} ({} bytes) from {}",
        format,
        image.width(),
        image.height(),
        bytes.len(),
        input
    );
    Ok(LoadedImage {
        source: input.to_string(),
        format,
        image,
        byte_len: bytes.len(),
    })
}

/// Fetch the raw bytes behind `input`.
pub async fn read_source(input: &str, download_timeout_secs: u64) -> Result<Vec<u8>, MediscriptError> {
    if input.trim().is_empty() {
        return Err(MediscriptError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, download_timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Identify JPEG or PNG by magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(JPEG_MAGIC) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(PNG_MAGIC) {
        Some(ImageFormat::Png)
    } else {
        None
    }
}

/// Decode JPEG or PNG bytes. Anything else is [`MediscriptError::UnsupportedImage`].
pub fn decode_image_bytes(bytes: &[u8], source_name: &str) -> Result<DynamicImage, MediscriptError> {
    let format = sniff_format(bytes).ok_or_else(|| unsupported(source_name, bytes))?;
    image::load_from_memory_with_format(bytes, format).map_err(|e| MediscriptError::ImageDecodeFailed {
        source_name: source_name.to_string(),
        detail: e.to_string(),
    })
}

fn unsupported(source_name: &str, bytes: &[u8]) -> MediscriptError {
    MediscriptError::UnsupportedImage {
        source_name: source_name.to_string(),
        magic: bytes.iter().take(8).copied().collect(),
    }
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, MediscriptError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(MediscriptError::PermissionDenied { path }),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(MediscriptError::FileNotFound { path }),
        Err(e) if path.is_dir() => Err(MediscriptError::InvalidInput {
            input: format!("{path_str} ({e})"),
        }),
        Err(e) => Err(MediscriptError::Internal(format!(
            "Failed to read '{}': {}",
            path.display(),
            e
        ))),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, MediscriptError> {
    info!("Downloading image from: {}", url);

    let failed = |reason: String| MediscriptError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            MediscriptError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(classify)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::png_bytes;
    use image::{GrayImage, Luma};

    fn tiny_png() -> Vec<u8> {
        png_bytes(&DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([128])))).unwrap()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/rx.jpg"));
        assert!(is_url("http://example.com/rx.png"));
        assert!(!is_url("/tmp/rx.jpg"));
        assert!(!is_url("rx.jpg"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniff_known_formats() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some(ImageFormat::Jpeg));
        assert_eq!(sniff_format(&tiny_png()), Some(ImageFormat::Png));
        assert_eq!(sniff_format(b"%PDF-1.7"), None);
        assert_eq!(sniff_format(b""), None);
    }

    #[test]
    fn decode_rejects_other_formats() {
        let err = decode_image_bytes(b"GIF89a......", "scan.gif").unwrap_err();
        match err {
            MediscriptError::UnsupportedImage { source_name, magic } => {
                assert_eq!(source_name, "scan.gif");
                assert_eq!(magic, b"GIF89a..".to_vec());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_reports_truncated_png() {
        let png = tiny_png();
        let err = decode_image_bytes(&png[..12], "cut.png").unwrap_err();
        assert!(matches!(err, MediscriptError::ImageDecodeFailed { .. }), "got {err}");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = load_image("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, MediscriptError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = load_image("  ", 5).await.unwrap_err();
        assert!(matches!(err, MediscriptError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn loads_local_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rx.png");
        std::fs::write(&path, tiny_png()).unwrap();

        let loaded = load_image(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(loaded.format, ImageFormat::Png);
        assert_eq!((loaded.image.width(), loaded.image.height()), (3, 2));
        assert_eq!(loaded.source, path.to_str().unwrap());
    }
}

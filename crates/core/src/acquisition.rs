//! Image acquisition and normalization.
//!
//! Reads the bytes behind an [`ImageSource`], optionally recompresses them to JPEG when
//! they exceed a size threshold, and produces the base64 text sent to the classifier.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use providers::EncodedImage;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ImageConfig, NormalizationMode};

pub const DEFAULT_THRESHOLD_BYTES: usize = 1024 * 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// What the camera or gallery picker hands over.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Gallery(PathBuf),
    /// Camera capture written to app-local storage.
    Capture(PathBuf),
    Memory(Vec<u8>),
}

impl ImageSource {
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Gallery(p) | ImageSource::Capture(p) => p.display().to_string(),
            ImageSource::Memory(bytes) => format!("<{} bytes in memory>", bytes.len()),
        }
    }

    pub fn capture_path(&self) -> Option<&Path> {
        match self {
            ImageSource::Capture(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match infer::get(bytes)?.mime_type() {
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageBlob {
    bytes: Vec<u8>,
    format: ImageFormat,
}

#[allow(clippy::len_without_is_empty)]
impl ImageBlob {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AcquisitionError> {
        if bytes.is_empty() {
            return Err(AcquisitionError::Empty);
        }
        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            AcquisitionError::UnsupportedFormat(
                infer::get(&bytes)
                    .map(|k| k.mime_type().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        })?;
        Ok(Self { bytes, format })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Never zero: `from_bytes` rejects empty content.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("image source is empty")]
    Empty,
    #[error("unsupported image format ({0}); expected JPEG or PNG")]
    UnsupportedFormat(String),
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("cannot encode image as JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error("image worker stopped: {0}")]
    Worker(String),
}

pub fn read_blob(source: &ImageSource) -> Result<ImageBlob, AcquisitionError> {
    let bytes = match source {
        ImageSource::Gallery(path) | ImageSource::Capture(path) => {
            let mut file = fs::File::open(path).map_err(|source| AcquisitionError::Open {
                path: path.clone(),
                source,
            })?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|source| AcquisitionError::Read {
                    path: path.clone(),
                    source,
                })?;
            buf
        }
        ImageSource::Memory(bytes) => bytes.clone(),
    };
    ImageBlob::from_bytes(bytes)
}

/// Decides what bytes go on the wire for a blob.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, blob: ImageBlob) -> Result<ImageBlob, AcquisitionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Normalizer for PassThrough {
    fn normalize(&self, blob: ImageBlob) -> Result<ImageBlob, AcquisitionError> {
        Ok(blob)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecompressAboveThreshold {
    pub threshold_bytes: usize,
    pub jpeg_quality: u8,
}

impl Default for RecompressAboveThreshold {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Normalizer for RecompressAboveThreshold {
    fn normalize(&self, blob: ImageBlob) -> Result<ImageBlob, AcquisitionError> {
        if !should_recompress(blob.len(), self.threshold_bytes) {
            return Ok(blob);
        }
        let jpeg = recompress_jpeg(blob.bytes(), self.jpeg_quality)?;
        info!(
            original = blob.len(),
            recompressed = jpeg.len(),
            quality = self.jpeg_quality,
            "recompressed oversized image"
        );
        Ok(ImageBlob {
            bytes: jpeg,
            format: ImageFormat::Jpeg,
        })
    }
}

pub fn should_recompress(len: usize, threshold_bytes: usize) -> bool {
    len > threshold_bytes
}

pub fn normalizer_for(cfg: &ImageConfig) -> Arc<dyn Normalizer> {
    match cfg.normalization {
        NormalizationMode::Passthrough => Arc::new(PassThrough),
        NormalizationMode::Recompress => Arc::new(RecompressAboveThreshold {
            threshold_bytes: cfg.threshold_bytes,
            jpeg_quality: cfg.jpeg_quality,
        }),
    }
}

/// Decodes any supported bitmap and re-encodes it as JPEG; alpha is dropped.
fn recompress_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, AcquisitionError> {
    let img = image::load_from_memory(bytes).map_err(AcquisitionError::Decode)?;
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(AcquisitionError::Encode)?;
    Ok(out)
}

pub fn encode(
    blob: ImageBlob,
    normalizer: &dyn Normalizer,
) -> Result<EncodedImage, AcquisitionError> {
    let original = blob.len();
    let normalized = normalizer.normalize(blob)?;
    let text = STANDARD.encode(normalized.bytes());
    debug!(
        original,
        sent = normalized.len(),
        format = normalized.format().mime_type(),
        encoded_len = text.len(),
        "encoded image"
    );
    Ok(EncodedImage::new(text))
}

/// Reads, normalizes and encodes on the blocking pool.
pub async fn acquire(
    source: ImageSource,
    normalizer: Arc<dyn Normalizer>,
) -> Result<EncodedImage, AcquisitionError> {
    tokio::task::spawn_blocking(move || {
        let blob = read_blob(&source)?;
        info!(source = %source.describe(), size = blob.len(), "acquired image");
        encode(blob, normalizer.as_ref())
    })
    .await
    .map_err(|e| AcquisitionError::Worker(e.to_string()))?
}

pub fn discard_capture_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed capture file"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove capture file"),
    }
}

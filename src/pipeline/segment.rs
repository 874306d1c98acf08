//! Image segmentation: cut the source image into horizontal strips.
//!
//! Tall scans (long delivery notes, receipts) lose detail when a model
//! downsamples them to its input size. Cutting them into `N` strips keeps
//! each request legible. With `N = 1` the whole image is sent as is.
//!
//! ## Partition law
//!
//! `partHeight = floor(H / N)`. Strip `i` covers rows
//! `[i * partHeight, (i + 1) * partHeight)`; the last strip runs to `H` and
//! absorbs the remainder. Heights always sum to `H`.
//!
//! Decoding, cropping and PNG encoding are CPU-bound, so
//! [`decode_and_segment`] runs them under `spawn_blocking`.

use crate::error::Img2XlsxError;
use crate::pipeline::encode::{encode_segment, SegmentPayload};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info, warn};

/// A decoded source image.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
    pub byte_len: usize,
}

impl SourceImage {
    /// Decode raw bytes. `source_name` is only used in error messages.
    pub fn decode(bytes: &[u8], source_name: &str) -> Result<Self, Img2XlsxError> {
        let format = image::guess_format(bytes).ok();
        let image = image::load_from_memory(bytes).map_err(|e| Img2XlsxError::DecodeFailed {
            source_name: source_name.to_string(),
            detail: e.to_string(),
        })?;

        if image.width() == 0 || image.height() == 0 {
            return Err(Img2XlsxError::DecodeFailed {
                source_name: source_name.to_string(),
                detail: format!("image has no pixels ({}x{})", image.width(), image.height()),
            });
        }

        debug!(
            "Decoded {} → {}x{} ({:?})",
            source_name,
            image.width(),
            image.height(),
            format
        );

        Ok(Self {
            image,
            format,
            byte_len: bytes.len(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// One horizontal strip of the source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSegment {
    /// 0-based position, top to bottom.
    pub index: usize,
    /// First pixel row covered.
    pub top: u32,
    /// Number of pixel rows covered.
    pub height: u32,
    pub payload: SegmentPayload,
}

/// Row ranges of a `height`-pixel image split into `parts` strips.
///
/// `parts` is clamped to `1..=height` so that no strip is zero pixels tall.
pub fn plan_segments(height: u32, parts: usize) -> Vec<Range<u32>> {
    if height == 0 {
        return Vec::new();
    }
    let parts = (parts.max(1) as u64).min(height as u64) as u32;
    let part_height = height / parts;

    (0..parts)
        .map(|i| {
            let top = i * part_height;
            let bottom = if i + 1 == parts {
                height
            } else {
                top + part_height
            };
            top..bottom
        })
        .collect()
}

/// Cut `source` into `parts` strips and encode each as a PNG payload.
pub fn segment_blocking(
    source: &SourceImage,
    parts: usize,
) -> Result<Vec<ImageSegment>, Img2XlsxError> {
    let (width, height) = (source.width(), source.height());
    if parts as u64 > height as u64 {
        warn!(
            "Requested {} segments but the image is only {} px tall; using {}",
            parts, height, height
        );
    }

    plan_segments(height, parts)
        .into_iter()
        .enumerate()
        .map(|(index, rows)| {
            let strip = if rows.start == 0 && rows.end == height {
                source.image.clone()
            } else {
                source.image.crop_imm(0, rows.start, width, rows.len() as u32)
            };
            let payload =
                encode_segment(&strip).map_err(|e| Img2XlsxError::SegmentEncodeFailed {
                    segment: index,
                    detail: e.to_string(),
                })?;
            Ok(ImageSegment {
                index,
                top: rows.start,
                height: rows.len() as u32,
                payload,
            })
        })
        .collect()
}

/// Decode `bytes` and split them, off the async executor.
pub async fn decode_and_segment(
    bytes: Vec<u8>,
    source_name: String,
    parts: usize,
) -> Result<(SourceImage, Vec<ImageSegment>), Img2XlsxError> {
    tokio::task::spawn_blocking(move || {
        let source = SourceImage::decode(&bytes, &source_name)?;
        let segments = segment_blocking(&source, parts)?;
        Ok::<_, Img2XlsxError>((source, segments))
    })
    .await
    .map_err(|e| Img2XlsxError::Internal(format!("Segment task panicked: {}", e)))?
    .inspect(|(_, segments)| info!("Split image into {} segment(s)", segments.len()))
}

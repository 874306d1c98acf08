//! Result types returned by the conversion entry points.
//!
//! Everything here is `Serialize + Deserialize` so the CLI can emit it as
//! JSON and callers can persist a run for later inspection.

use crate::error::{Img2XlsxError, SegmentError};
use crate::grid::Grid;
use serde::{Deserialize, Serialize};

/// User-facing message for a run that produced no text.
pub const NO_TEXT_MESSAGE: &str = "No text could be extracted from the image.";

/// Outcome of one segment's extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
    /// 0-based segment index.
    pub index: usize,
    /// First pixel row of the strip.
    pub top: u32,
    /// Strip height in pixels.
    pub height: u32,
    /// Returned text; empty when the model saw nothing or the segment was skipped.
    pub text: String,
    /// Number of model calls made (1 or 2).
    pub attempts: u8,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Wall-clock time including pacing delays.
    pub duration_ms: u64,
    /// Set when both attempts failed.
    pub error: Option<SegmentError>,
}

impl SegmentResult {
    pub fn is_skipped(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_text(&self) -> bool {
        self.error.is_none() && !self.text.trim().is_empty()
    }
}

/// Basic facts about the decoded source image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Detected container format, e.g. "Png".
    pub format: Option<String>,
    /// Size of the fetched bytes.
    pub byte_len: usize,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_segments: usize,
    pub segments_with_text: usize,
    pub empty_segments: usize,
    pub skipped_segments: usize,
    /// Segments that needed their retry (successful or not).
    pub retries: usize,
    pub grid_rows: usize,
    pub grid_columns: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub fetch_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl ConversionStats {
    /// Tally per-segment results. Grid and timing fields are left at zero.
    pub fn from_segments(segments: &[SegmentResult]) -> Self {
        Self {
            total_segments: segments.len(),
            segments_with_text: segments.iter().filter(|s| s.has_text()).count(),
            empty_segments: segments
                .iter()
                .filter(|s| !s.is_skipped() && !s.has_text())
                .count(),
            skipped_segments: segments.iter().filter(|s| s.is_skipped()).count(),
            retries: segments.iter().filter(|s| s.attempts > 1).count(),
            total_input_tokens: segments.iter().map(|s| s.input_tokens).sum(),
            total_output_tokens: segments.iter().map(|s| s.output_tokens).sum(),
            ..Default::default()
        }
    }
}

/// A successful run: the combined text, the parsed grid, and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Non-empty segment texts joined with `\n`, in segment order.
    pub text: String,
    pub grid: Grid,
    pub segments: Vec<SegmentResult>,
    pub image: ImageMetadata,
    pub stats: ConversionStats,
}

/// What a completed run produced.
///
/// `NoText` is a normal outcome, not an error: the image was fetched and
/// read, but every segment came back empty or was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConversionOutcome {
    Extracted(ConversionOutput),
    NoText {
        segments: Vec<SegmentResult>,
        image: ImageMetadata,
        stats: ConversionStats,
    },
}

impl ConversionOutcome {
    pub fn is_no_text(&self) -> bool {
        matches!(self, ConversionOutcome::NoText { .. })
    }

    pub fn stats(&self) -> &ConversionStats {
        match self {
            ConversionOutcome::Extracted(out) => &out.stats,
            ConversionOutcome::NoText { stats, .. } => stats,
        }
    }

    /// The extracted output, or [`Img2XlsxError::NoTextExtracted`].
    pub fn into_result(self) -> Result<ConversionOutput, Img2XlsxError> {
        match self {
            ConversionOutcome::Extracted(out) => Ok(out),
            ConversionOutcome::NoText { segments, .. } => Err(Img2XlsxError::NoTextExtracted {
                segments: segments.len(),
            }),
        }
    }
}

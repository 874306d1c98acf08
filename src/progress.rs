//! Progress-callback trait for per-segment conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events while the pipeline works through the image strips.
//!
//! Segments are processed one at a time, so events for one run arrive in
//! order. The trait is still `Send + Sync` because the same callback may be
//! shared by several concurrent runs.
//!
//! # Example
//!
//! ```rust
//! use edgequake_img2xlsx::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     retries: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_segment_retry(&self, segment: usize, _total: usize, error: &str) {
//!         self.retries.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("segment {segment} retrying: {error}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { retries: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each segment.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Segment numbers are 0-based.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after the image is split, before the first request.
    fn on_conversion_start(&self, total_segments: usize) {
        let _ = total_segments;
    }

    /// Called just before the first request for a segment is sent.
    fn on_segment_start(&self, segment: usize, total_segments: usize) {
        let _ = (segment, total_segments);
    }

    /// Called when the first attempt failed and a retry is scheduled.
    fn on_segment_retry(&self, segment: usize, total_segments: usize, error: &str) {
        let _ = (segment, total_segments, error);
    }

    /// Called when a segment returned text (possibly empty).
    ///
    /// `text_len` is the byte length of the returned text.
    fn on_segment_complete(&self, segment: usize, total_segments: usize, text_len: usize) {
        let _ = (segment, total_segments, text_len);
    }

    /// Called when a segment failed twice and is skipped.
    fn on_segment_skipped(&self, segment: usize, total_segments: usize, error: &str) {
        let _ = (segment, total_segments, error);
    }

    /// Called once after every segment has been attempted.
    ///
    /// `with_text` counts segments that produced non-empty text.
    fn on_conversion_complete(&self, total_segments: usize, with_text: usize) {
        let _ = (total_segments, with_text);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

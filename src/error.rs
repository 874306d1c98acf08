//! Error types for the edgequake-img2xlsx library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Img2XlsxError`] — **Fatal**: the conversion cannot proceed at all
//!   (image unreachable, bytes not decodable, provider not configured,
//!   spreadsheet could not be written). Returned as `Err(Img2XlsxError)`
//!   from the top-level `convert*` functions.
//!
//! * [`SegmentError`] — **Non-fatal**: one image strip failed twice (network
//!   glitch, model error, timeout) but the other strips are fine. Stored
//!   inside [`crate::output::SegmentResult`]; the failed strip simply
//!   contributes no text.
//!
//! There is deliberately no parse error: the table parser accepts any text
//! and degrades to ragged rows.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-img2xlsx library.
///
/// Segment-level failures use [`SegmentError`] and are stored in
/// [`crate::output::SegmentResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Img2XlsxError {
    // ── Fetch errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but the download failed or
    /// answered with a non-2xx status.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The bytes could not be measured or decoded as an image.
    #[error("Could not decode image '{source_name}': {detail}\nSupported formats: PNG, JPEG, GIF.")]
    DecodeFailed { source_name: String, detail: String },

    /// A strip could not be re-encoded for the model request.
    #[error("Failed to encode segment {segment}: {detail}")]
    SegmentEncodeFailed { segment: usize, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Vision model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every segment came back empty or was skipped.
    ///
    /// Only returned by entry points that must produce a file
    /// ([`crate::convert::convert_to_file`]); [`crate::convert::convert`]
    /// reports this as [`crate::output::ConversionOutcome::NoText`].
    #[error("No text could be extracted from the image ({segments} segment(s) attempted)")]
    NoTextExtracted { segments: usize },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The spreadsheet encoder refused the grid.
    #[error("Could not generate the spreadsheet: {detail}")]
    EncodeFailed { detail: String },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Credit errors ─────────────────────────────────────────────────────
    /// The user has no credits left; the pipeline was not started.
    #[error("User '{user_id}' has no credits left")]
    InsufficientCredits { user_id: String },

    /// The credit ledger backend failed.
    #[error("Credit ledger error: {0}")]
    Ledger(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was aborted through its `AbortHandle`.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Img2XlsxError {
    /// True for the fetch family of errors (input could not be obtained).
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Img2XlsxError::FileNotFound { .. }
                | Img2XlsxError::PermissionDenied { .. }
                | Img2XlsxError::InvalidInput { .. }
                | Img2XlsxError::DownloadFailed { .. }
                | Img2XlsxError::DownloadTimeout { .. }
        )
    }
}

/// A non-fatal error for a single segment.
///
/// Stored alongside [`crate::output::SegmentResult`] when a segment is
/// skipped. The conversion continues with the next segment.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum SegmentError {
    /// Model call failed on the first attempt and on the retry.
    #[error("Segment {segment}: extraction failed after {attempts} attempts: {detail}")]
    ExtractionFailed {
        segment: usize,
        attempts: u8,
        detail: String,
    },

    /// The last attempt timed out.
    #[error("Segment {segment}: model call timed out after {secs}s")]
    Timeout { segment: usize, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_failed_display() {
        let e = Img2XlsxError::DownloadFailed {
            url: "https://example.com/scan.png".into(),
            reason: "HTTP 404 Not Found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("scan.png"), "got: {msg}");
        assert!(msg.contains("404"), "got: {msg}");
        assert!(e.is_fetch_error());
    }

    #[test]
    fn decode_failed_is_not_fetch_error() {
        let e = Img2XlsxError::DecodeFailed {
            source_name: "scan.png".into(),
            detail: "bad magic".into(),
        };
        assert!(!e.is_fetch_error());
        assert!(e.to_string().contains("bad magic"));
    }

    #[test]
    fn no_text_display() {
        let e = Img2XlsxError::NoTextExtracted { segments: 3 };
        assert!(e.to_string().contains("3 segment"));
    }

    #[test]
    fn segment_timeout_display() {
        let e = SegmentError::Timeout {
            segment: 2,
            secs: 60,
        };
        assert!(e.to_string().contains("60s"));
        assert!(e.to_string().contains("Segment 2"));
    }

    #[test]
    fn segment_error_serialises() {
        let e = SegmentError::ExtractionFailed {
            segment: 1,
            attempts: 2,
            detail: "HTTP 503".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: SegmentError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}

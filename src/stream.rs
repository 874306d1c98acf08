//! Streaming conversion API: emit segment results as they complete.
//!
//! Unlike the eager [`crate::convert::convert`], which returns only after
//! every strip has been extracted and parsed, [`convert_stream`] yields each
//! [`SegmentResult`] as soon as its strip is done. Segments still go out one
//! at a time, in index order, with the same pacing and single retry, so
//! items always arrive in segment order.
//!
//! The stream does not parse. Join the non-empty texts with `\n` and hand
//! them to [`crate::pipeline::parse::parse_table`] to get the grid.

use crate::config::ConversionConfig;
use crate::convert::resolve_model;
use crate::error::Img2XlsxError;
use crate::output::SegmentResult;
use crate::pipeline::extract::SegmentExtractor;
use crate::pipeline::input::fetch_image;
use crate::pipeline::model::VisionModel;
use crate::pipeline::segment::{decode_and_segment, ImageSegment};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of segment results.
pub type SegmentStream = Pin<Box<dyn Stream<Item = SegmentResult> + Send>>;

struct StreamState {
    model: Arc<dyn VisionModel>,
    config: ConversionConfig,
    segments: std::vec::IntoIter<ImageSegment>,
    total: usize,
    with_text: usize,
}

/// Convert an image, streaming per-segment results as they are ready.
///
/// # Returns
/// - `Ok(SegmentStream)`: one item per segment, skipped segments included
///   (their `error` is set)
/// - `Err(Img2XlsxError)`: fatal error before the first request (fetch,
///   decode, model resolution)
pub async fn convert_stream(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<SegmentStream, Img2XlsxError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming conversion: {}", input_str);

    let fetched = fetch_image(input_str, config.download_timeout_secs).await?;
    let model = resolve_model(config)?;
    let (_source, segments) =
        decode_and_segment(fetched.bytes, fetched.source_name, config.segments).await?;

    let total = segments.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    let state = StreamState {
        model,
        config: config.clone(),
        segments: segments.into_iter(),
        total,
        with_text: 0,
    };

    let s = stream::unfold(state, |mut st| async move {
        let Some(segment) = st.segments.next() else {
            if let Some(ref cb) = st.config.progress_callback {
                cb.on_conversion_complete(st.total, st.with_text);
            }
            return None;
        };

        let result = SegmentExtractor::new(Arc::clone(&st.model), &st.config, st.total)
            .run(&segment)
            .await;
        if result.has_text() {
            st.with_text += 1;
        }
        Some((result, st))
    });

    Ok(s.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{ExtractionRequest, ExtractionResponse, ModelError};
    use async_trait::async_trait;
    use image::{ImageFormat, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every other call so the second segment needs its retry.
    #[derive(Default)]
    struct FlakyModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionModel for FlakyModel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn extract(
            &self,
            _request: &ExtractionRequest<'_>,
        ) -> Result<ExtractionResponse, ModelError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                1 => Err(ModelError::Status {
                    status: 429,
                    body: "slow down".into(),
                }),
                n => Ok(ExtractionResponse::text(format!("row{n},x"))),
            }
        }
    }

    fn write_png(dir: &std::path::Path, height: u32) -> String {
        let path = dir.join("strip.png");
        RgbImage::new(8, height)
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test(start_paused = true)]
    async fn yields_each_segment_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_png(dir.path(), 30);
        let model = Arc::new(FlakyModel::default());
        let config = ConversionConfig::builder()
            .segments(3)
            .model_client(model.clone())
            .build()
            .unwrap();

        let results: Vec<SegmentResult> = convert_stream(&input, &config)
            .await
            .unwrap()
            .collect()
            .await;

        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(results[0].text, "row0,x");
        assert_eq!(results[1].attempts, 2);
        assert_eq!(results[1].text, "row2,x");
        assert_eq!(results[2].text, "row3,x");
        assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_errors_surface_before_streaming() {
        let config = ConversionConfig::builder()
            .model_client(Arc::new(FlakyModel::default()))
            .build()
            .unwrap();
        let err = convert_stream("/no/such/scan.png", &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Img2XlsxError::FileNotFound { .. }));
    }
}

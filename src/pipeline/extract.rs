//! Rate-limited extraction: one model call per segment, strictly in order.
//!
//! The backing model enforces a minimum interval between requests, so the
//! segments of one run are never sent concurrently. Before every request
//! the extractor waits a fixed pacing delay; a failed call waits a longer
//! delay and is retried exactly once. A segment that fails twice is skipped
//! and the run moves on. One bad strip never costs the whole table.
//!
//! ## Per-segment state machine
//!
//! ```text
//!  Pending ──pace──▶ InFlight ──ok──▶ Done
//!                      │  ▲
//!                 fail │  │ retry delay
//!                      ▼  │
//!                    Retrying        (second failure) ──▶ Skipped
//! ```
//!
//! After the last segment, non-empty texts are joined with `\n` in segment
//! order. If none remain the run reports [`Extraction::NoText`].

use crate::config::ConversionConfig;
use crate::error::SegmentError;
use crate::output::SegmentResult;
use crate::pipeline::model::{ExtractionRequest, ExtractionResponse, ModelError, VisionModel};
use crate::pipeline::segment::ImageSegment;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

/// First attempt plus one retry.
pub const MAX_ATTEMPTS: u8 = 2;

/// Lifecycle of one segment inside the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Pending,
    InFlight,
    Retrying,
    Done,
    Skipped,
}

impl SegmentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SegmentState::Done | SegmentState::Skipped)
    }
}

/// Combined result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Non-empty segment texts joined with `\n`.
    Text(String),
    /// Every segment was empty or skipped.
    NoText,
}

/// Everything [`extract_all`] learned about a run.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub segments: Vec<SegmentResult>,
    pub extraction: Extraction,
    pub duration_ms: u64,
}

/// Drives one segment at a time through the state machine.
///
/// Callers await [`SegmentExtractor::run`] for each segment before starting
/// the next, so requests never overlap.
pub struct SegmentExtractor<'a> {
    model: Arc<dyn VisionModel>,
    config: &'a ConversionConfig,
    total: usize,
}

impl<'a> SegmentExtractor<'a> {
    pub fn new(model: Arc<dyn VisionModel>, config: &'a ConversionConfig, total: usize) -> Self {
        Self {
            model,
            config,
            total,
        }
    }

    /// Process one segment to a terminal state. Never fails: a second
    /// failure is recorded in [`SegmentResult::error`].
    pub async fn run(&self, segment: &ImageSegment) -> SegmentResult {
        let start = Instant::now();
        let mut state = SegmentState::Pending;
        let mut attempts: u8 = 0;
        let mut response: Option<ExtractionResponse> = None;
        let mut last_error: Option<ModelError> = None;

        while !state.is_terminal() {
            state = match state {
                SegmentState::Pending => {
                    self.pace(segment).await;
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_segment_start(segment.index, self.total);
                    }
                    SegmentState::InFlight
                }
                SegmentState::InFlight => {
                    attempts += 1;
                    match self.call(segment).await {
                        Ok(r) => {
                            response = Some(r);
                            SegmentState::Done
                        }
                        Err(e) => {
                            warn!(
                                "Segment {}: attempt {}/{} failed: {}",
                                segment.index, attempts, MAX_ATTEMPTS, e
                            );
                            let next = if attempts < MAX_ATTEMPTS {
                                if let Some(ref cb) = self.config.progress_callback {
                                    cb.on_segment_retry(segment.index, self.total, &e.to_string());
                                }
                                SegmentState::Retrying
                            } else {
                                SegmentState::Skipped
                            };
                            last_error = Some(e);
                            next
                        }
                    }
                }
                SegmentState::Retrying => {
                    debug!(
                        "Segment {}: retrying in {}ms",
                        segment.index, self.config.retry_delay_ms
                    );
                    sleep(self.config.retry_delay()).await;
                    SegmentState::InFlight
                }
                terminal => terminal,
            };
            trace!("Segment {} → {:?}", segment.index, state);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut result = SegmentResult {
            index: segment.index,
            top: segment.top,
            height: segment.height,
            text: String::new(),
            attempts,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms,
            error: None,
        };

        match (state, response) {
            (SegmentState::Done, Some(r)) => {
                debug!(
                    "Segment {}: {} chars, {} in / {} out tokens, {}ms",
                    segment.index,
                    r.text.len(),
                    r.input_tokens,
                    r.output_tokens,
                    duration_ms
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_segment_complete(segment.index, self.total, r.text.len());
                }
                result.text = r.text;
                result.input_tokens = r.input_tokens;
                result.output_tokens = r.output_tokens;
            }
            _ => {
                let error = match last_error {
                    Some(ModelError::Timeout { secs }) => SegmentError::Timeout {
                        segment: segment.index,
                        secs,
                    },
                    other => SegmentError::ExtractionFailed {
                        segment: segment.index,
                        attempts,
                        detail: other
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "Unknown error".to_string()),
                    },
                };
                warn!("Segment {} skipped: {}", segment.index, error);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_segment_skipped(segment.index, self.total, &error.to_string());
                }
                result.error = Some(error);
            }
        }

        result
    }

    /// Wait the pacing delay before a segment's first request.
    async fn pace(&self, segment: &ImageSegment) {
        if segment.index == 0 && self.config.skip_initial_delay {
            return;
        }
        sleep(self.config.request_delay()).await;
    }

    /// One bounded model call.
    async fn call(&self, segment: &ImageSegment) -> Result<ExtractionResponse, ModelError> {
        let request = ExtractionRequest {
            system_instruction: &self.config.prompts.system_instruction,
            user_instruction: &self.config.prompts.user_instruction,
            image: &segment.payload,
        };

        match tokio::time::timeout(self.config.api_timeout(), self.model.extract(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout {
                secs: self.config.api_timeout_secs,
            }),
        }
    }
}

/// Join non-empty segment texts with `\n`, in segment order.
pub fn combine_texts(results: &[SegmentResult]) -> Extraction {
    let texts: Vec<&str> = results
        .iter()
        .filter(|r| r.has_text())
        .map(|r| r.text.as_str())
        .collect();

    if texts.is_empty() {
        Extraction::NoText
    } else {
        Extraction::Text(texts.join("\n"))
    }
}

/// Extract every segment, in index order, one request at a time.
pub async fn extract_all(
    model: &Arc<dyn VisionModel>,
    segments: &[ImageSegment],
    config: &ConversionConfig,
) -> ExtractionReport {
    let start = Instant::now();
    let total = segments.len();
    info!("Extracting {} segment(s) with {}", total, model.name());

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    let extractor = SegmentExtractor::new(Arc::clone(model), config, total);
    let mut results = Vec::with_capacity(total);
    for segment in segments {
        results.push(extractor.run(segment).await);
    }

    let extraction = combine_texts(&results);
    let with_text = results.iter().filter(|r| r.has_text()).count();

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total, with_text);
    }

    ExtractionReport {
        segments: results,
        extraction,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::SegmentPayload;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant as TokioInstant;

    type Reply = Result<&'static str, ModelError>;

    /// Answers from a per-segment script and records every call.
    #[derive(Default)]
    struct ScriptedModel {
        scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<(String, TokioInstant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
    }

    impl ScriptedModel {
        fn new(scripts: &[(&str, Vec<Reply>)]) -> Self {
            Self {
                scripts: Mutex::new(
                    scripts
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.iter().cloned().collect()))
                        .collect(),
                ),
                ..Default::default()
            }
        }

        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn call_order(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
        }

        fn call_times(&self) -> Vec<TokioInstant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn extract(
            &self,
            request: &ExtractionRequest<'_>,
        ) -> Result<ExtractionResponse, ModelError> {
            let key = request.image.data.clone();
            self.calls
                .lock()
                .unwrap()
                .push((key.clone(), TokioInstant::now()));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(ModelError::Transport("script exhausted".into())));
            reply.map(ExtractionResponse::text)
        }
    }

    fn segments(keys: &[&str]) -> Vec<ImageSegment> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| ImageSegment {
                index: i,
                top: i as u32 * 10,
                height: 10,
                payload: SegmentPayload {
                    data: k.to_string(),
                    mime_type: "image/png".into(),
                },
            })
            .collect()
    }

    fn fail() -> Reply {
        Err(ModelError::Status {
            status: 503,
            body: "overloaded".into(),
        })
    }

    async fn run(model: Arc<ScriptedModel>, keys: &[&str], config: &ConversionConfig) -> ExtractionReport {
        let dyn_model: Arc<dyn VisionModel> = model;
        extract_all(&dyn_model, &segments(keys), config).await
    }

    #[tokio::test(start_paused = true)]
    async fn failed_segment_is_skipped_and_rest_continue() {
        let model = Arc::new(ScriptedModel::new(&[
            ("A", vec![Ok("a")]),
            ("B", vec![fail(), fail()]),
            ("C", vec![Ok("c")]),
        ]));
        let report = run(Arc::clone(&model), &["A", "B", "C"], &ConversionConfig::default()).await;

        assert_eq!(report.extraction, Extraction::Text("a\nc".into()));
        assert_eq!(model.call_order(), vec!["A", "B", "B", "C"]);

        let b = &report.segments[1];
        assert_eq!(b.attempts, 2);
        assert!(b.text.is_empty());
        assert!(matches!(
            b.error,
            Some(SegmentError::ExtractionFailed { segment: 1, attempts: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_recovers_on_retry() {
        let model = Arc::new(ScriptedModel::new(&[
            ("A", vec![Ok("a")]),
            ("B", vec![fail(), Ok("b")]),
            ("C", vec![Ok("c")]),
        ]));
        let report = run(model, &["A", "B", "C"], &ConversionConfig::default()).await;

        assert_eq!(report.extraction, Extraction::Text("a\nb\nc".into()));
        assert_eq!(report.segments[1].attempts, 2);
        assert!(report.segments[1].error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn all_empty_or_failed_is_no_text() {
        let model = Arc::new(ScriptedModel::new(&[
            ("A", vec![Ok("")]),
            ("B", vec![fail(), fail()]),
            ("C", vec![Ok("  \n ")]),
        ]));
        let report = run(model, &["A", "B", "C"], &ConversionConfig::default()).await;
        assert_eq!(report.extraction, Extraction::NoText);
        assert!(report.segments[0].error.is_none(), "empty text is not an error");
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_sequential_and_paced() {
        let model = Arc::new(
            ScriptedModel::new(&[
                ("A", vec![Ok("a")]),
                ("B", vec![fail(), Ok("b")]),
                ("C", vec![Ok("c")]),
            ])
            .with_latency(Duration::from_millis(200)),
        );
        let t0 = TokioInstant::now();
        run(Arc::clone(&model), &["A", "B", "C"], &ConversionConfig::default()).await;

        assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 1);

        let offsets: Vec<u128> = model
            .call_times()
            .iter()
            .map(|t| t.duration_since(t0).as_millis())
            .collect();
        // A: 1500 delay. B: +200 latency +1500 delay. B retry: +200 +5000.
        // C: +200 +1500.
        assert_eq!(offsets, vec![1500, 3200, 8400, 10100]);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_can_be_skipped() {
        let model = Arc::new(ScriptedModel::new(&[("A", vec![Ok("a")]), ("B", vec![Ok("b")])]));
        let config = ConversionConfig::builder()
            .skip_initial_delay(true)
            .build()
            .unwrap();
        let t0 = TokioInstant::now();
        run(Arc::clone(&model), &["A", "B"], &config).await;

        let offsets: Vec<u128> = model
            .call_times()
            .iter()
            .map(|t| t.duration_since(t0).as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 1500]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_retried_then_reported() {
        let model = Arc::new(
            ScriptedModel::new(&[("A", vec![Ok("late"), Ok("late")])])
                .with_latency(Duration::from_secs(120)),
        );
        let config = ConversionConfig::builder()
            .api_timeout_secs(30)
            .build()
            .unwrap();
        let report = run(Arc::clone(&model), &["A"], &config).await;

        assert_eq!(model.call_order(), vec!["A", "A"]);
        assert_eq!(report.extraction, Extraction::NoText);
        assert_eq!(
            report.segments[0].error,
            Some(SegmentError::Timeout { segment: 0, secs: 30 })
        );
    }

    #[test]
    fn combine_preserves_order_and_drops_empty() {
        let mk = |index: usize, text: &str| SegmentResult {
            index,
            top: 0,
            height: 1,
            text: text.into(),
            attempts: 1,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            error: None,
        };
        let results = vec![mk(0, "x,y"), mk(1, ""), mk(2, "z,w")];
        assert_eq!(combine_texts(&results), Extraction::Text("x,y\nz,w".into()));
        assert_eq!(combine_texts(&[]), Extraction::NoText);
    }

    #[test]
    fn terminal_states() {
        assert!(SegmentState::Done.is_terminal());
        assert!(SegmentState::Skipped.is_terminal());
        assert!(!SegmentState::Pending.is_terminal());
        assert!(!SegmentState::InFlight.is_terminal());
        assert!(!SegmentState::Retrying.is_terminal());
    }
}

//! Eager (whole-image) conversion entry points.
//!
//! [`convert`] fetches the image, cuts it into strips, extracts every strip
//! and parses the combined text before returning. Use
//! [`crate::stream::convert_stream`] to receive segment results as they
//! finish instead.

use crate::config::ConversionConfig;
use crate::error::Img2XlsxError;
use crate::output::{
    ConversionOutcome, ConversionOutput, ConversionStats, ImageMetadata, NO_TEXT_MESSAGE,
};
use crate::pipeline::extract::{extract_all, Extraction};
use crate::pipeline::input::fetch_image;
use crate::pipeline::model::{
    ChatCompletionsModel, ProviderModel, VisionModel, DEFAULT_VISION_MODEL, MISTRAL_API_KEY_ENV,
    MISTRAL_CHAT_ENDPOINT,
};
use crate::pipeline::parse::parse_table;
use crate::pipeline::segment::{decode_and_segment, SourceImage};
use crate::sheet::{save_workbook, write_workbook};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::future::{AbortHandle, Abortable};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Provider name that selects the built-in `chat/completions` client.
pub const CHAT_COMPLETIONS_PROVIDER: &str = "mistral-chat";

/// Download timeout used by [`inspect`].
const INSPECT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Convert an image file or URL into a table.
///
/// # Returns
/// * `Ok(ConversionOutcome::Extracted(_))` when at least one segment
///   produced text. Skipped segments are listed in `segments`.
/// * `Ok(ConversionOutcome::NoText { .. })` when every segment came back
///   empty or failed twice.
///
/// # Errors
/// Only for fatal problems: the image could not be fetched or decoded, or
/// no vision model is configured.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, Img2XlsxError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    // ── Step 1: Fetch ────────────────────────────────────────────────────
    let fetch_start = Instant::now();
    let fetched = fetch_image(input_str, config.download_timeout_secs).await?;
    let fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;

    // ── Step 2: Resolve model ────────────────────────────────────────────
    let model = resolve_model(config)?;

    // ── Step 3: Decode and segment ───────────────────────────────────────
    let (source, segments) =
        decode_and_segment(fetched.bytes, fetched.source_name, config.segments).await?;
    let image = image_metadata(&source);
    drop(source);

    // ── Step 4: Extract ──────────────────────────────────────────────────
    let report = extract_all(&model, &segments, config).await;

    let mut stats = ConversionStats::from_segments(&report.segments);
    stats.fetch_duration_ms = fetch_duration_ms;
    stats.extraction_duration_ms = report.duration_ms;

    // ── Step 5: Parse ────────────────────────────────────────────────────
    let text = match report.extraction {
        Extraction::Text(text) => text,
        Extraction::NoText => {
            stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
            info!(
                "No text extracted from {} segment(s) ({} skipped)",
                stats.total_segments, stats.skipped_segments
            );
            return Ok(ConversionOutcome::NoText {
                segments: report.segments,
                image,
                stats,
            });
        }
    };

    let grid = parse_table(&text, config.prompts.delimiter);
    stats.grid_rows = grid.len();
    stats.grid_columns = grid.column_count();
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Conversion complete: {}/{} segments with text, {} rows, {}ms total",
        stats.segments_with_text, stats.total_segments, stats.grid_rows, stats.total_duration_ms
    );

    Ok(ConversionOutcome::Extracted(ConversionOutput {
        text,
        grid,
        segments: report.segments,
        image,
        stats,
    }))
}

/// Like [`convert`], but abortable.
///
/// Calling [`AbortHandle::abort`] drops the run at its current await point
/// (download, pacing delay or model call) and the future resolves to
/// [`Img2XlsxError::Cancelled`].
pub fn convert_cancellable<'a>(
    input_str: &'a str,
    config: &'a ConversionConfig,
) -> (
    impl Future<Output = Result<ConversionOutcome, Img2XlsxError>> + Send + 'a,
    AbortHandle,
) {
    let (handle, registration) = AbortHandle::new_pair();
    let run = Abortable::new(convert(input_str, config), registration);
    let fut = async move {
        match run.await {
            Ok(result) => result,
            Err(_aborted) => {
                info!("Conversion of {} cancelled", input_str);
                Err(Img2XlsxError::Cancelled)
            }
        }
    };
    (fut, handle)
}

/// Convert an image and write the workbook to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files. A run
/// without text has nothing to write and returns
/// [`Img2XlsxError::NoTextExtracted`].
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Img2XlsxError> {
    let output = convert(input_str, config).await?.into_result()?;
    let bytes = write_workbook(&output.grid, &config.sheet_name, config.max_column_width)?;
    save_workbook(&bytes, output_path.as_ref()).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutcome, Img2XlsxError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Img2XlsxError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Fetch and decode an image without calling a model.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<ImageMetadata, Img2XlsxError> {
    let fetched = fetch_image(input_str.as_ref(), INSPECT_DOWNLOAD_TIMEOUT_SECS).await?;
    tokio::task::spawn_blocking(move || {
        SourceImage::decode(&fetched.bytes, &fetched.source_name).map(|s| image_metadata(&s))
    })
    .await
    .map_err(|e| Img2XlsxError::Internal(format!("Decode task panicked: {}", e)))?
}

/// Run the pipeline and report the outcome as display text.
///
/// Returns the combined extracted text, [`NO_TEXT_MESSAGE`], or the
/// rendered error. Never fails.
pub async fn process_image(input_str: impl AsRef<str>, config: &ConversionConfig) -> String {
    match convert(input_str, config).await {
        Ok(ConversionOutcome::Extracted(output)) => output.text,
        Ok(ConversionOutcome::NoText { .. }) => NO_TEXT_MESSAGE.to_string(),
        Err(e) => format!("Error: {}", e),
    }
}

/// Parse delimited `text` with the configured delimiter and encode it as a
/// workbook.
pub fn to_spreadsheet(text: &str, config: &ConversionConfig) -> Result<Vec<u8>, Img2XlsxError> {
    let grid = parse_table(text, config.prompts.delimiter);
    write_workbook(&grid, &config.sheet_name, config.max_column_width)
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn image_metadata(source: &SourceImage) -> ImageMetadata {
    ImageMetadata {
        width: source.width(),
        height: source.height(),
        format: source.format.map(|f| format!("{:?}", f)),
        byte_len: source.byte_len,
    }
}

fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name {
        "mistral" => DEFAULT_VISION_MODEL,
        _ => "gpt-4.1-nano",
    }
}

fn chat_completions_model(config: &ConversionConfig) -> Result<Arc<dyn VisionModel>, Img2XlsxError> {
    let endpoint = config.endpoint.as_deref().unwrap_or(MISTRAL_CHAT_ENDPOINT);
    let api_key = std::env::var(MISTRAL_API_KEY_ENV)
        .ok()
        .filter(|k| !k.is_empty());
    let model = ChatCompletionsModel::new(
        endpoint,
        config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL),
        api_key,
        config.api_timeout(),
    )
    .map_err(|e| Img2XlsxError::ProviderNotConfigured {
        provider: CHAT_COMPLETIONS_PROVIDER.to_string(),
        hint: e.to_string(),
    })?
    .with_options(config.temperature, config.max_tokens);
    Ok(Arc::new(model))
}

fn provider_model(
    provider: Arc<dyn LLMProvider>,
    label: String,
    config: &ConversionConfig,
) -> Arc<dyn VisionModel> {
    Arc::new(
        ProviderModel::new(provider, label).with_options(config.temperature, config.max_tokens),
    )
}

fn named_provider_model(
    provider_name: &str,
    model: &str,
    config: &ConversionConfig,
) -> Result<Arc<dyn VisionModel>, Img2XlsxError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Img2XlsxError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(provider_model(
        provider,
        format!("{}/{}", provider_name, model),
        config,
    ))
}

/// Resolve the vision model, from most-specific to least-specific.
///
/// 1. **Injected client** (`config.model_client`), used as-is.
/// 2. **Named provider** (`config.provider_name`). [`CHAT_COMPLETIONS_PROVIDER`]
///    selects the built-in client; any other name goes through
///    [`ProviderFactory::create_llm_provider`]. A custom `endpoint` without a
///    provider name also selects the built-in client.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`MISTRAL_API_KEY`**: the built-in client against Mistral.
/// 5. **Auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_model(config: &ConversionConfig) -> Result<Arc<dyn VisionModel>, Img2XlsxError> {
    if let Some(ref client) = config.model_client {
        return Ok(Arc::clone(client));
    }

    match config.provider_name.as_deref() {
        Some(CHAT_COMPLETIONS_PROVIDER) => return chat_completions_model(config),
        Some(name) => {
            let model = config.model.as_deref().unwrap_or(default_model_for(name));
            return named_provider_model(name, model, config);
        }
        None if config.endpoint.is_some() => return chat_completions_model(config),
        None => {}
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return named_provider_model(&prov, &model, config);
        }
    }

    if let Some(client) =
        ChatCompletionsModel::mistral_from_env(config.model.as_deref(), config.api_timeout())
    {
        let client = client.map_err(|e| Img2XlsxError::ProviderNotConfigured {
            provider: CHAT_COMPLETIONS_PROVIDER.to_string(),
            hint: e.to_string(),
        })?;
        return Ok(Arc::new(
            client.with_options(config.temperature, config.max_tokens),
        ));
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Img2XlsxError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision model could be auto-detected from environment.\n\
                Set MISTRAL_API_KEY, OPENAI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(provider_model(llm_provider, "auto".to_string(), config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{ExtractionRequest, ExtractionResponse, ModelError};
    use async_trait::async_trait;

    struct FixedModel;

    #[async_trait]
    impl VisionModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract(
            &self,
            _request: &ExtractionRequest<'_>,
        ) -> Result<ExtractionResponse, ModelError> {
            Ok(ExtractionResponse::text("a,b"))
        }
    }

    #[test]
    fn injected_client_wins() {
        let config = ConversionConfig::builder()
            .model_client(Arc::new(FixedModel))
            .provider_name("openai")
            .build()
            .unwrap();
        let model = resolve_model(&config).unwrap();
        assert_eq!(model.name(), "fixed");
    }

    #[test]
    fn chat_provider_name_selects_builtin_client() {
        let config = ConversionConfig::builder()
            .provider_name(CHAT_COMPLETIONS_PROVIDER)
            .model("pixtral-12b-2409")
            .build()
            .unwrap();
        let model = resolve_model(&config).unwrap();
        assert_eq!(model.name(), "chat/pixtral-12b-2409");
    }

    #[test]
    fn custom_endpoint_selects_builtin_client() {
        let config = ConversionConfig::builder()
            .endpoint("http://localhost:8080/v1/chat/completions")
            .build()
            .unwrap();
        let model = resolve_model(&config).unwrap();
        assert_eq!(model.name(), format!("chat/{}", DEFAULT_VISION_MODEL));
    }

    #[test]
    fn to_spreadsheet_uses_configured_delimiter() {
        let config = ConversionConfig::builder()
            .prompt_variant(crate::prompts::PromptVariant::Pipe)
            .build()
            .unwrap();
        let bytes = to_spreadsheet("a|b\nc", &config).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn process_image_renders_fetch_errors() {
        let config = ConversionConfig::builder()
            .model_client(Arc::new(FixedModel))
            .build()
            .unwrap();
        let msg = process_image("/no/such/scan.png", &config).await;
        assert!(msg.starts_with("Error: Image file not found"), "got: {msg}");
    }

    #[tokio::test]
    async fn inspect_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        let err = inspect(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, Img2XlsxError::DecodeFailed { .. }));
    }
}

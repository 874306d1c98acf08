//! Configuration types for image-to-spreadsheet conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`],
//! built via its [`ConversionConfigBuilder`]. One struct holds every knob so
//! a config can be cloned into each pipeline run, logged, and compared.
//!
//! Everything a deployment may want to switch without code changes lives
//! here: the prompt family and its delimiter, the pacing delays that keep us
//! under the model's rate limit, and the model backend itself.

use crate::error::Img2XlsxError;
use crate::pipeline::model::VisionModel;
use crate::progress::ProgressCallback;
use crate::prompts::{PromptSet, PromptVariant};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sheet name used when none is configured.
pub const DEFAULT_SHEET_NAME: &str = "Bon de livraison";

/// Upper bound on the number of strips an image may be cut into.
pub const MAX_SEGMENTS: usize = 64;

/// Configuration for an image-to-spreadsheet conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_img2xlsx::{ConversionConfig, PromptVariant};
///
/// let config = ConversionConfig::builder()
///     .segments(2)
///     .prompt_variant(PromptVariant::Pipe)
///     .request_delay_ms(1500)
///     .build()
///     .unwrap();
/// assert_eq!(config.prompts.delimiter, '|');
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Number of horizontal strips the image is cut into. Default: 1.
    ///
    /// With 1 the whole image is sent in a single request. Tall scans read
    /// better when split, at the cost of one extra request (and one extra
    /// pacing delay) per strip.
    pub segments: usize,

    /// Pause before each model request, in milliseconds. Default: 1500.
    ///
    /// The backing model enforces a minimum interval between requests.
    /// Requests are never issued concurrently, so this delay alone keeps a
    /// run under the limit.
    pub request_delay_ms: u64,

    /// Pause before the single retry of a failed segment. Default: 5000.
    pub retry_delay_ms: u64,

    /// Skip the pacing delay before the very first request. Default: false.
    ///
    /// Leave it off when several runs may start back to back against the
    /// same API key.
    pub skip_initial_delay: bool,

    /// Per-model-call timeout in seconds. Default: 60.
    ///
    /// A timeout counts as a failed attempt and is retried like any other
    /// transport error.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Model identifier, e.g. "pixtral-large-2411", "gpt-4.1-mini".
    /// If None, uses the backend default.
    pub model: Option<String>,

    /// Provider name (e.g. "mistral-chat", "openai", "anthropic").
    /// If None along with `model_client`, resolved from the environment.
    pub provider_name: Option<String>,

    /// Override for the `chat/completions` endpoint used by the
    /// "mistral-chat" backend (any OpenAI-compatible server works).
    pub endpoint: Option<String>,

    /// Pre-constructed model client. Takes precedence over `provider_name`.
    pub model_client: Option<Arc<dyn VisionModel>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per segment. Default: 4096.
    pub max_tokens: usize,

    /// Instructions and cell delimiter. Default: comma prompts.
    pub prompts: PromptSet,

    /// Worksheet name in the generated workbook. Default: "Bon de livraison".
    pub sheet_name: String,

    /// Cap for the per-column width hint, in characters. Default: 50.
    pub max_column_width: usize,

    /// Optional per-segment progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            segments: 1,
            request_delay_ms: 1500,
            retry_delay_ms: 5000,
            skip_initial_delay: false,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            model: None,
            provider_name: None,
            endpoint: None,
            model_client: None,
            temperature: 0.1,
            max_tokens: 4096,
            prompts: PromptSet::default(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            max_column_width: 50,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("segments", &self.segments)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("skip_initial_delay", &self.skip_initial_delay)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("endpoint", &self.endpoint)
            .field(
                "model_client",
                &self.model_client.as_ref().map(|m| m.name().to_string()),
            )
            .field("delimiter", &self.prompts.delimiter)
            .field("sheet_name", &self.sheet_name)
            .field("max_column_width", &self.max_column_width)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn segments(mut self, n: usize) -> Self {
        self.config.segments = n.clamp(1, MAX_SEGMENTS);
        self
    }

    pub fn request_delay_ms(mut self, ms: u64) -> Self {
        self.config.request_delay_ms = ms;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn skip_initial_delay(mut self, v: bool) -> Self {
        self.config.skip_initial_delay = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    pub fn model_client(mut self, client: Arc<dyn VisionModel>) -> Self {
        self.config.model_client = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt_variant(mut self, variant: PromptVariant) -> Self {
        self.config.prompts = PromptSet::for_variant(variant);
        self
    }

    pub fn prompts(mut self, prompts: PromptSet) -> Self {
        self.config.prompts = prompts;
        self
    }

    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.sheet_name = name.into();
        self
    }

    pub fn max_column_width(mut self, chars: usize) -> Self {
        self.config.max_column_width = chars.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Img2XlsxError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(Img2XlsxError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.prompts.delimiter.is_whitespace() {
            return Err(Img2XlsxError::InvalidConfig(format!(
                "Cell delimiter must not be whitespace, got {:?}",
                c.prompts.delimiter
            )));
        }
        if c.prompts.system_instruction.trim().is_empty()
            || c.prompts.user_instruction.trim().is_empty()
        {
            return Err(Img2XlsxError::InvalidConfig(
                "System and user instructions must not be empty".into(),
            ));
        }
        validate_sheet_name(&c.sheet_name)?;
        Ok(self.config)
    }
}

/// Excel limits sheet names to 31 characters and forbids `[]:*?/\`.
fn validate_sheet_name(name: &str) -> Result<(), Img2XlsxError> {
    if name.trim().is_empty() {
        return Err(Img2XlsxError::InvalidConfig(
            "Sheet name must not be empty".into(),
        ));
    }
    if name.chars().count() > 31 {
        return Err(Img2XlsxError::InvalidConfig(format!(
            "Sheet name '{}' is longer than 31 characters",
            name
        )));
    }
    if let Some(bad) = name.chars().find(|c| "[]:*?/\\".contains(*c)) {
        return Err(Img2XlsxError::InvalidConfig(format!(
            "Sheet name '{}' contains forbidden character '{}'",
            name, bad
        )));
    }
    Ok(())
}

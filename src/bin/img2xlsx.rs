//! CLI binary for edgequake-img2xlsx.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_img2xlsx::sheet::{save_workbook, DEFAULT_FILE_NAME};
use edgequake_img2xlsx::{
    convert, inspect, write_workbook, ConversionConfig, ConversionOutcome,
    ConversionProgressCallback, ProgressCallback, PromptVariant, NO_TEXT_MESSAGE,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let head: String = msg.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        msg.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders a progress bar plus one log line per segment.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-segment start times, including pacing delays.
    start_times: Mutex<HashMap<usize, Instant>>,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us the segment count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Fetching image…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            skipped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} segments  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
    }

    fn elapsed_secs(&self, segment: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&segment))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_segments: usize) {
        self.activate_bar(total_segments);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_segments} segment(s)…"))
        ));
    }

    fn on_segment_start(&self, segment: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(segment, Instant::now());
        }
        self.bar.set_message(format!("segment {}", segment + 1));
    }

    fn on_segment_retry(&self, segment: usize, total: usize, error: &str) {
        self.bar.println(format!(
            "  {} Segment {:>2}/{:<2}  {}",
            yellow("↻"),
            segment + 1,
            total,
            dim(&format!("retrying after: {}", truncate(error, 70))),
        ));
    }

    fn on_segment_complete(&self, segment: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(segment);
        self.bar.println(format!(
            "  {} Segment {:>2}/{:<2}  {:<8}  {}",
            green("✓"),
            segment + 1,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_segment_skipped(&self, segment: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(segment);
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Segment {:>2}/{:<2}  {}  {}",
            red("✗"),
            segment + 1,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_segments: usize, with_text: usize) {
        self.bar.finish_and_clear();
        let skipped = self.skipped.load(Ordering::SeqCst);

        if skipped == 0 {
            eprintln!(
                "{} {}/{} segments returned text",
                green("✔"),
                bold(&with_text.to_string()),
                total_segments
            );
        } else {
            eprintln!(
                "{} {}/{} segments returned text  ({} skipped)",
                if skipped == total_segments {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&with_text.to_string()),
                total_segments,
                red(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print the extracted table text
  img2xlsx bon-de-livraison.jpg

  # Write a workbook, cutting a tall scan into 4 strips
  img2xlsx -s 4 scan.png -o table.xlsx

  # From a URL, pipe-delimited prompt
  img2xlsx --variant pipe https://example.com/delivery-note.png -o note.xlsx

  # Image facts only (no API key needed)
  img2xlsx --inspect-only scan.png

  # Full JSON report (segments, grid, stats)
  img2xlsx --json scan.png > report.json

MODELS:
  Without --provider, the model is picked in this order:
    1. EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL
    2. MISTRAL_API_KEY     → built-in chat client, pixtral-large-2411
    3. any key edgequake-llm can auto-detect (OPENAI_API_KEY, …)
  --provider mistral-chat  forces the built-in chat client
  --endpoint URL           built-in chat client against another server

ENVIRONMENT VARIABLES:
  MISTRAL_API_KEY         Mistral API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Extract tables from images into spreadsheets using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "img2xlsx",
    version,
    about = "Extract tables from images into spreadsheets using Vision LLMs",
    long_about = "Read a photo or scan of a tabular document (local file or URL), extract its \
text with a Vision Language Model strip by strip, and write the table to an .xlsx workbook.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path (PNG, JPEG, GIF) or HTTP/HTTPS URL.
    input: String,

    /// Write the workbook to this file (or into this directory).
    #[arg(short, long, env = "IMG2XLSX_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID (e.g. pixtral-large-2411, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Provider: mistral-chat, mistral, openai, anthropic, gemini, ollama.
    #[arg(long, env = "IMG2XLSX_PROVIDER")]
    provider: Option<String>,

    /// chat/completions endpoint for the built-in client.
    #[arg(long, env = "IMG2XLSX_ENDPOINT")]
    endpoint: Option<String>,

    /// Number of horizontal strips to cut the image into.
    #[arg(short, long, env = "IMG2XLSX_SEGMENTS", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..=64))]
    segments: u32,

    /// Pause before each model request, in milliseconds.
    #[arg(long, env = "IMG2XLSX_REQUEST_DELAY_MS", default_value_t = 1500)]
    request_delay: u64,

    /// Pause before the single retry of a failed request, in milliseconds.
    #[arg(long, env = "IMG2XLSX_RETRY_DELAY_MS", default_value_t = 5000)]
    retry_delay: u64,

    /// Send the first request without waiting.
    #[arg(long, env = "IMG2XLSX_SKIP_INITIAL_DELAY")]
    skip_initial_delay: bool,

    /// Delimiter the model is asked to use.
    #[arg(long, env = "IMG2XLSX_VARIANT", value_enum, default_value = "comma")]
    variant: VariantArg,

    /// Worksheet name.
    #[arg(long, env = "IMG2XLSX_SHEET_NAME", default_value = "Bon de livraison")]
    sheet_name: String,

    /// Upper bound for automatic column widths, in characters.
    #[arg(long, env = "IMG2XLSX_MAX_COLUMN_WIDTH", default_value_t = 50)]
    max_column_width: usize,

    /// Max model output tokens per segment.
    #[arg(long, env = "IMG2XLSX_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "IMG2XLSX_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-request model timeout in seconds.
    #[arg(long, env = "IMG2XLSX_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "IMG2XLSX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Also print the extracted text when writing a workbook.
    #[arg(long)]
    text: bool,

    /// Output the full conversion report as JSON.
    #[arg(long, env = "IMG2XLSX_JSON")]
    json: bool,

    /// Print image facts only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMG2XLSX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2XLSX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2XLSX_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum VariantArg {
    Comma,
    Pipe,
}

impl From<VariantArg> for PromptVariant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Comma => PromptVariant::Comma,
            VariantArg::Pipe => PromptVariant::Pipe,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input).await.context("Failed to inspect image")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("Image:   {}", cli.input);
            println!("Size:    {}x{} px", meta.width, meta.height);
            println!("Format:  {}", meta.format.as_deref().unwrap_or("unknown"));
            println!("Bytes:   {}", meta.byte_len);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let outcome = convert(&cli.input, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?;
        println!("{json}");
    }

    let output = match outcome {
        ConversionOutcome::Extracted(output) => output,
        ConversionOutcome::NoText { .. } => {
            if cli.output.is_some() {
                bail!("{} No workbook was written.", NO_TEXT_MESSAGE);
            }
            if !cli.json {
                println!("{NO_TEXT_MESSAGE}");
            }
            return Ok(());
        }
    };

    if let Some(ref output_arg) = cli.output {
        let path = if output_arg.is_dir() {
            output_arg.join(DEFAULT_FILE_NAME)
        } else {
            output_arg.clone()
        };
        let bytes = write_workbook(&output.grid, &config.sheet_name, config.max_column_width)
            .context("Failed to build workbook")?;
        save_workbook(&bytes, &path)
            .await
            .context("Failed to write workbook")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} rows × {} columns  {}ms  →  {}",
                if output.stats.skipped_segments == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                output.stats.grid_rows,
                output.stats.grid_columns,
                output.stats.total_duration_ms,
                bold(&path.display().to_string()),
            );
        }
    }

    if !cli.json && (cli.output.is_none() || cli.text) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !cli.json {
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&output.stats.total_input_tokens.to_string()),
            dim(&output.stats.total_output_tokens.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .segments(cli.segments as usize)
        .request_delay_ms(cli.request_delay)
        .retry_delay_ms(cli.retry_delay)
        .skip_initial_delay(cli.skip_initial_delay)
        .prompt_variant(cli.variant.into())
        .sheet_name(cli.sheet_name.clone())
        .max_column_width(cli.max_column_width)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

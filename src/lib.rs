//! # edgequake-img2xlsx
//!
//! Turn a photo or scan of a tabular document (delivery notes, invoices,
//! price lists) into an `.xlsx` spreadsheet using a Vision Language Model.
//!
//! The image is cut into horizontal strips so each request stays small and
//! legible. Every strip is sent to the model with a fixed instruction asking
//! for a delimited table, strictly one request at a time with a pacing delay
//! in between. The returned text is parsed into a ragged grid and written to
//! a single-sheet workbook.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image (URL or path)
//!  │
//!  ├─ 1. Input    download or read the bytes
//!  ├─ 2. Segment  decode and cut into N strips (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode   strip → PNG → base64
//!  ├─ 4. Extract  paced VLM calls, one retry per strip, failures skipped
//!  ├─ 5. Parse    delimited text → ragged grid
//!  └─ 6. Sheet    grid → xlsx bytes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_img2xlsx::{convert, ConversionConfig, ConversionOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Model auto-detected from MISTRAL_API_KEY / OPENAI_API_KEY / …
//!     let config = ConversionConfig::builder().segments(3).build()?;
//!     match convert("bon-de-livraison.jpg", &config).await? {
//!         ConversionOutcome::Extracted(output) => {
//!             println!("{} rows", output.grid.len());
//!         }
//!         ConversionOutcome::NoText { .. } => eprintln!("nothing readable"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2xlsx` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-img2xlsx = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod grid;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sheet;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{
    convert, convert_cancellable, convert_sync, convert_to_file, inspect, process_image,
    to_spreadsheet,
};
pub use error::{Img2XlsxError, SegmentError};
pub use grid::{Grid, Row};
pub use ledger::{
    convert_for_user, convert_for_user_cancellable, CreditLedger, InMemoryLedger, UserConversion,
};
pub use output::{
    ConversionOutcome, ConversionOutput, ConversionStats, ImageMetadata, SegmentResult,
    NO_TEXT_MESSAGE,
};
pub use pipeline::model::{
    ChatCompletionsModel, ExtractionRequest, ExtractionResponse, ModelError, ProviderModel,
    VisionModel,
};
pub use pipeline::parse::parse_table;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::{PromptSet, PromptVariant};
pub use sheet::write_workbook;
pub use stream::{convert_stream, SegmentStream};

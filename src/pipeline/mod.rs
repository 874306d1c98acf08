//! Pipeline stages for image-to-spreadsheet conversion.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ segment ──▶ encode ──▶ extract ──▶ parse
//! (URL/path) (strips)   (base64)   (VLM)       (grid)
//! ```
//!
//! 1. [`input`]   — fetch the user-supplied path or URL into memory
//! 2. [`segment`] — decode and cut the image into horizontal strips; runs in
//!    `spawn_blocking` because decoding is CPU-bound
//! 3. [`encode`]  — PNG-encode and base64-wrap each strip for the request body
//! 4. [`extract`] — paced, sequential model calls with one retry per strip;
//!    the stage with model I/O. [`model`] is the seam to the model itself.
//! 5. [`parse`]   — turn the combined delimited text into a ragged grid

pub mod encode;
pub mod extract;
pub mod input;
pub mod model;
pub mod parse;
pub mod segment;

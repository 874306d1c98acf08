//! Image encoding: `DynamicImage` strip → base64 PNG [`SegmentPayload`].
//!
//! Vision APIs accept images as base64 data embedded in the JSON request
//! body. PNG is used because it is lossless: crisp glyph edges matter more
//! for transcription than payload size.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// A self-contained encoded image, ready for a model request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPayload {
    /// Base64 body without any `data:` prefix.
    pub data: String,
    pub mime_type: String,
}

impl SegmentPayload {
    /// Render as a `data:<mime>;base64,<body>` URI.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Encode one strip as a base64 PNG.
pub fn encode_segment(img: &DynamicImage) -> Result<SegmentPayload, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} strip → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(SegmentPayload {
        data: b64,
        mime_type: "image/png".to_string(),
    })
}

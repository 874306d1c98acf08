//! Input resolution: read the user-supplied path or URL into memory.
//!
//! Images are decoded from a byte buffer, so unlike a file-backed renderer
//! there is no need for a temp file. A URL is downloaded with a bounded
//! timeout; a local path is read after checking it exists and is readable.

use crate::error::Img2XlsxError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Raw image bytes plus a short name used in logs and error messages.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub source_name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Fetch the image bytes from a URL or local path.
pub async fn fetch_image(input: &str, timeout_secs: u64) -> Result<FetchedImage, Img2XlsxError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Img2XlsxError::InvalidInput {
            input: input.to_string(),
        });
    }

    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.contains("://") {
        Err(Img2XlsxError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<FetchedImage, Img2XlsxError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Img2XlsxError::PermissionDenied { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Img2XlsxError::FileNotFound { path });
        }
        Err(e) => {
            return Err(Img2XlsxError::InvalidInput {
                input: format!("{}: {}", path.display(), e),
            });
        }
    };

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());

    Ok(FetchedImage { bytes, source_name })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<FetchedImage, Img2XlsxError> {
    info!("Downloading image from: {}", url);

    let parsed = reqwest::Url::parse(url).map_err(|_| Img2XlsxError::InvalidInput {
        input: url.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Img2XlsxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_error = |e: reqwest::Error| {
        if e.is_timeout() {
            Img2XlsxError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Img2XlsxError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(parsed.clone()).send().await.map_err(map_send_error)?;

    if !response.status().is_success() {
        return Err(Img2XlsxError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_send_error)?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(FetchedImage {
        bytes: bytes.to_vec(),
        source_name: filename_from_url(&parsed),
    })
}

/// Last path segment of the URL, or a generic name.
fn filename_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|last| !last.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "downloaded-image".to_string())
}

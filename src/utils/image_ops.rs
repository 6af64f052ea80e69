use base64::{engine::general_purpose, Engine};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

use crate::core::errors::{EndpointError, EndpointResult};

const DEFAULT_MIME_TYPE: &str = "image/jpeg";

static DATA_URL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:(image/[A-Za-z0-9.+-]+);base64,").expect("valid regex"));

/// Base64 image payload ready to embed in a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime_type: String,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// Resolve an image reference into base64.
///
/// Accepts, in order:
/// - a `data:image/...;base64,` URL (prefix stripped, declared MIME kept)
/// - a path to a readable file (read and encoded, MIME sniffed from magic bytes)
/// - a bare base64 string
pub async fn encode_image_reference(reference: &str) -> EndpointResult<EncodedImage> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(EndpointError::InvalidImage("empty image reference".to_string()));
    }

    if reference.starts_with("data:") {
        let captures = DATA_URL_PREFIX.captures(reference).ok_or_else(|| {
            EndpointError::InvalidImage("data URL is not a base64-encoded image".to_string())
        })?;
        let prefix_len = captures.get(0).map(|m| m.end()).unwrap_or(0);
        return Ok(EncodedImage {
            base64: strip_whitespace(&reference[prefix_len..]),
            mime_type: captures[1].to_string(),
        });
    }

    let path = Path::new(reference);
    if tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false) {
        let bytes = tokio::fs::read(path).await.map_err(|source| EndpointError::ImageRead {
            path: reference.to_string(),
            source,
        })?;
        debug!("Encoded {} ({} bytes)", reference, bytes.len());
        return Ok(EncodedImage {
            base64: general_purpose::STANDARD.encode(&bytes),
            mime_type: sniff_mime_type(&bytes),
        });
    }

    let candidate = strip_whitespace(reference);
    match general_purpose::STANDARD.decode(&candidate) {
        Ok(bytes) => Ok(EncodedImage {
            base64: candidate,
            mime_type: sniff_mime_type(&bytes),
        }),
        Err(_) => Err(EndpointError::ImageRead {
            path: reference.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file and not base64 image data",
            ),
        }),
    }
}

/// MIME type from magic bytes, JPEG when unknown
pub fn sniff_mime_type(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| DEFAULT_MIME_TYPE.to_string())
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

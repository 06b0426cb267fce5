//! Frame Loading
//!
//! The harness replays one pre-encoded frame: a text file holding either
//! raw base64 or a `data:image/...;base64,` URL, exactly what a capture
//! loop would hand to the dispatcher.

use std::path::Path;

use anyhow::{bail, Context};

/// Read and check an encoded frame
pub async fn load_frame(path: &Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read frame file {}", path.display()))?;
    parse_frame(&raw).with_context(|| format!("invalid frame in {}", path.display()))
}

/// Validate encoded frame text, returning it trimmed
pub fn parse_frame(raw: &str) -> anyhow::Result<String> {
    let frame = raw.trim();
    if frame.is_empty() {
        bail!("frame is empty");
    }

    let payload = match frame.strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((mime, payload)) if mime.starts_with("image/") => payload,
            _ => bail!("data URL must look like data:image/<type>;base64,<payload>"),
        },
        None => frame,
    };

    let is_base64 = |c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=');
    if payload.is_empty() || !payload.chars().all(is_base64) {
        bail!("payload is not base64");
    }

    Ok(frame.to_string())
}

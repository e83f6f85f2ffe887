//! Compact encoding of workspace snapshots for sharing and autosave
//!
//! JSON, deflated, then URL-safe base64 without padding so the result can be
//! dropped into a URL fragment.

use crate::workspace::Workspace;
use crate::{PlaygroundError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use playground_types::WorkspaceSnapshot;
use std::io::{Read, Write};
use tracing::warn;

pub fn encode(workspace: &Workspace) -> Result<String> {
    let json = serde_json::to_vec(&workspace.to_snapshot())?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

pub fn decode(encoded: &str) -> Result<Workspace> {
    let compressed = URL_SAFE_NO_PAD.decode(encoded.trim())?;
    let mut json = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| PlaygroundError::Serialization(format!("corrupt snapshot: {}", e)))?;
    let snapshot: WorkspaceSnapshot = serde_json::from_slice(&json)?;
    Ok(Workspace::from_snapshot(snapshot))
}

/// Decode `encoded`, falling back to `default` on any failure
pub fn decode_or_default<F>(encoded: &str, default: F) -> Workspace
where
    F: FnOnce() -> Workspace,
{
    match decode(encoded) {
        Ok(workspace) => workspace,
        Err(e) => {
            warn!("Could not decode shared workspace, using default: {}", e);
            default()
        }
    }
}

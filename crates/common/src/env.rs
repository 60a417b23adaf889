//! Environment/runtime helpers
//!
//! Sanity checks run once at startup, before the store connects.

use std::path::Path;

use tracing::{info, warn};

/// Make sure the directory holding the snapshot file exists. An empty location
/// means a memory-only store and needs nothing.
pub async fn ensure_data_dir(location: &str) -> anyhow::Result<()> {
    if location.trim().is_empty() {
        warn!("no storage location configured; data will be lost on shutdown");
        return Ok(());
    }
    let parent = match Path::new(location).parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    if tokio::fs::metadata(parent).await.is_err() {
        info!(dir = %parent.display(), "creating data directory");
    }
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", parent.display()))?;
    Ok(())
}

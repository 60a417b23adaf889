use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::types::Entries;

const EMPTY_OBJECT: &[u8] = b"{}";

/// Load the snapshot at `path`, creating it with an empty object if missing.
pub async fn load(path: &Path) -> Result<Entries, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io("create data directory", e))?;
    }

    if fs::metadata(path).await.is_err() {
        fs::write(path, EMPTY_OBJECT)
            .await
            .map_err(|e| StoreError::io("create snapshot file", e))?;
        info!(path = %path.display(), "created empty snapshot file");
    }

    let bytes = fs::read(path)
        .await
        .map_err(|e| StoreError::io("read snapshot file", e))?;
    decode(&bytes)
}

/// Load the snapshot at `path` without creating anything.
pub async fn load_existing(path: &Path) -> Result<Option<Entries>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io("read snapshot file", e)),
    }
}

pub fn decode(bytes: &[u8]) -> Result<Entries, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::io("parse snapshot", e))
}

pub fn encode(entries: &Entries) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(entries).map_err(|e| StoreError::io("serialize snapshot", e))
}

/// Replace the file at `path` with the serialized entries.
///
/// Writes to a sibling temp file first and renames it over the target, so a crash
/// mid-write leaves the previous snapshot intact.
pub async fn save(path: &Path, entries: &Entries) -> Result<(), StoreError> {
    let data = encode(entries)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, &data)
        .await
        .map_err(|e| StoreError::io("write snapshot", e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io("replace snapshot", e))?;
    debug!(path = %path.display(), bytes = data.len(), keys = entries.len(), "snapshot saved");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tmp_file(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kv_codec_{tag}_{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn load_creates_missing_file() -> anyhow::Result<()> {
        let path = tmp_file("missing");
        let entries = load(&path).await?;
        assert!(entries.is_empty());
        assert_eq!(tokio::fs::read(&path).await?, b"{}");
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn load_creates_parent_directories() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("kv_codec_dir_{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("db.json");
        assert!(load(&path).await?.is_empty());
        assert!(path.exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
        Ok(())
    }

    #[tokio::test]
    async fn load_rejects_invalid_json() -> anyhow::Result<()> {
        let path = tmp_file("invalid");
        tokio::fs::write(&path, b"{not json").await?;
        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn load_rejects_non_object_top_level() -> anyhow::Result<()> {
        let path = tmp_file("array");
        tokio::fs::write(&path, b"[1,2,3]").await?;
        assert!(matches!(load(&path).await, Err(StoreError::Io(_))));
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn save_replaces_contents_and_leaves_no_temp_file() -> anyhow::Result<()> {
        let path = tmp_file("save");
        let mut entries = Entries::new();
        entries.insert("a".into(), json!({"nested": [1, 2, null]}));
        entries.insert("b".into(), json!(true));
        save(&path, &entries).await?;

        entries.remove("b");
        save(&path, &entries).await?;

        let reloaded = load(&path).await?;
        assert_eq!(reloaded, entries);
        assert!(!tmp_path(&path).exists());
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn load_existing_does_not_create() -> anyhow::Result<()> {
        let path = tmp_file("existing");
        assert!(load_existing(&path).await?.is_none());
        assert!(!path.exists());
        Ok(())
    }
}

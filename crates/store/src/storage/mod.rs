//! Snapshot storage for the store
//!
//! `codec` turns the entry map into the on-disk JSON object and back;
//! `SnapshotTarget` is the seam the write scheduler persists through.

pub mod codec;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::types::Entries;

/// Destination of full-state snapshots.
#[async_trait]
pub trait SnapshotTarget: Send + Sync + 'static {
    async fn save(&self, entries: &Entries) -> Result<(), StoreError>;
}

/// JSON file snapshot target.
#[derive(Debug, Clone)]
pub struct FileTarget {
    path: PathBuf,
}

impl FileTarget {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl SnapshotTarget for FileTarget {
    async fn save(&self, entries: &Entries) -> Result<(), StoreError> {
        codec::save(&self.path, entries).await
    }
}

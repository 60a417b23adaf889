use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("shutdown drain timed out after {0:?}")]
    ShutdownDrainTimeout(Duration),
    #[error("store is already connected")]
    AlreadyConnected,
}

impl StoreError {
    pub fn io(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Io(format!("{context}: {err}"))
    }

    /// Soft errors are reported on the error stream but never fail an operation.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::ShutdownDrainTimeout(_))
    }
}

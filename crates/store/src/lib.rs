//! In-memory key/value store with debounced JSON snapshot persistence.
//! - `Store` owns the map and decides when a snapshot is worth writing.
//! - `scheduler` runs the single background writer and the shutdown drain.
//! - `storage` holds the JSON codec and the snapshot target abstraction.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod types;

pub use config::PersistenceConfig;
pub use errors::StoreError;
pub use store::Store;
pub use types::{DeleteOutcome, Entries, Entry};

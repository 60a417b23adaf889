use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::errors::StoreError;
use crate::metrics::{record_op, SNAPSHOT_REQUESTS_TOTAL};
use crate::scheduler::{SchedulerHandle, SnapshotJob, WriteScheduler};
use crate::storage::{codec, FileTarget};
use crate::types::{DeleteOutcome, Entries, Entry};

const ERROR_STREAM_CAPACITY: usize = 16;

/// In-memory key/value store with optional snapshot persistence.
///
/// Every operation takes the same lock. Mutations copy the whole map for the
/// write scheduler when the persistence policy asks for it; the copy is taken
/// under the lock and handed to the scheduler after the lock is released.
pub struct Store {
    config: PersistenceConfig,
    inner: Mutex<Inner>,
    lifecycle: Mutex<Lifecycle>,
    errors: std::sync::Mutex<Option<mpsc::Receiver<StoreError>>>,
}

struct Inner {
    entries: Entries,
    link: Option<SchedulerLink>,
    last_stamp: Instant,
}

struct SchedulerLink {
    jobs: mpsc::Sender<SnapshotJob>,
    last_accepted: watch::Receiver<Instant>,
}

enum Lifecycle {
    Idle { errors: mpsc::Sender<StoreError> },
    Connected { scheduler: Option<SchedulerHandle> },
    Disconnected,
}

impl Inner {
    /// Strictly increasing stamp, so two snapshots never compare equal.
    fn next_stamp(&mut self, now: Instant) -> Instant {
        let stamp = if now > self.last_stamp {
            now
        } else {
            self.last_stamp + Duration::from_nanos(1)
        };
        self.last_stamp = stamp;
        stamp
    }

    fn snapshot_request(&mut self, config: &PersistenceConfig) -> Option<(SnapshotJob, mpsc::Sender<SnapshotJob>)> {
        let (jobs, last_accepted) = {
            let link = self.link.as_ref()?;
            (link.jobs.clone(), *link.last_accepted.borrow())
        };
        let now = Instant::now();
        if !config.should_request(last_accepted, now) {
            return None;
        }
        let timestamp = self.next_stamp(now);
        Some((SnapshotJob::new(timestamp, self.entries.clone()), jobs))
    }
}

impl Store {
    pub fn new(config: PersistenceConfig) -> Arc<Self> {
        let (err_tx, err_rx) = mpsc::channel(ERROR_STREAM_CAPACITY);
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner { entries: Entries::new(), link: None, last_stamp: Instant::now() }),
            lifecycle: Mutex::new(Lifecycle::Idle { errors: err_tx }),
            errors: std::sync::Mutex::new(Some(err_rx)),
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Take the persistence error stream. Only the first caller gets it; the
    /// stream ends once the store is disconnected.
    pub fn subscribe_errors(&self) -> Option<mpsc::Receiver<StoreError>> {
        self.errors.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Load the backing file (creating it if needed) and start the write
    /// scheduler. Entries loaded from the file overwrite same-named entries
    /// created before connecting.
    pub async fn connect(&self) -> Result<(), StoreError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Idle { .. }) {
            return Err(StoreError::AlreadyConnected);
        }

        let loaded = match self.config.location() {
            Some(path) if self.config.is_durable() => Some(codec::load(path).await?),
            Some(path) => codec::load_existing(path).await?,
            None => None,
        };

        let errors = match std::mem::replace(&mut *lifecycle, Lifecycle::Disconnected) {
            Lifecycle::Idle { errors } => errors,
            _ => return Err(StoreError::AlreadyConnected),
        };

        let mut inner = self.inner.lock().await;
        if let Some(entries) = loaded {
            info!(keys = entries.len(), "loaded snapshot");
            inner.entries.extend(entries);
        }

        let scheduler = match self.config.location() {
            Some(path) if self.config.is_durable() => {
                let started = inner.next_stamp(Instant::now());
                let handle = WriteScheduler::spawn(
                    Arc::new(FileTarget::new(path.clone())),
                    self.config.queue_capacity,
                    self.config.drain_timeout,
                    errors,
                    started,
                );
                inner.link = Some(SchedulerLink { jobs: handle.jobs(), last_accepted: handle.last_accepted() });
                info!(
                    path = %path.display(),
                    continuous_write = self.config.continuous_write,
                    write_interval_minutes = self.config.write_interval_minutes,
                    "persistence enabled"
                );
                Some(handle)
            }
            _ => {
                info!(memory_only = self.config.memory_only, "persistence disabled; keeping data in memory");
                None
            }
        };

        *lifecycle = Lifecycle::Connected { scheduler };
        Ok(())
    }

    /// Write the current state one last time and stop the write scheduler.
    /// Calling it again, or on a memory-only store, does nothing.
    pub async fn disconnect(&self) -> Result<(), StoreError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let scheduler = match std::mem::replace(&mut *lifecycle, Lifecycle::Disconnected) {
            Lifecycle::Connected { scheduler: Some(scheduler) } => scheduler,
            _ => return Ok(()),
        };

        let final_job = {
            let mut inner = self.inner.lock().await;
            inner.link = None;
            let timestamp = inner.next_stamp(Instant::now());
            SnapshotJob::new(timestamp, inner.entries.clone())
        };
        info!(keys = final_job.data.len(), "flushing final snapshot");

        let result = scheduler.shutdown(final_job).await;
        match &result {
            Ok(()) => info!("store disconnected"),
            Err(e) => warn!(error = %e, "final snapshot failed"),
        }
        result
    }

    pub async fn create(&self, key: impl Into<String>, value: Value) -> Result<Entry, StoreError> {
        let key = key.into();
        record_op("create");
        self.mutate(|entries| {
            if entries.contains_key(&key) {
                return Err(StoreError::KeyAlreadyExists(key));
            }
            entries.insert(key.clone(), value.clone());
            Ok((Entry::new(key, value), true))
        })
        .await
    }

    pub async fn read(&self, key: &str) -> Result<Value, StoreError> {
        record_op("read");
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    /// Values for each requested key; `None` marks keys that are not present.
    pub async fn read_many<S: AsRef<str>>(&self, keys: &[S]) -> BTreeMap<String, Option<Value>> {
        record_op("read_many");
        let inner = self.inner.lock().await;
        keys.iter()
            .map(|k| {
                let k = k.as_ref();
                (k.to_string(), inner.entries.get(k).cloned())
            })
            .collect()
    }

    /// Every entry in key order.
    pub async fn read_all(&self) -> Vec<(String, Value)> {
        record_op("read_all");
        let inner = self.inner.lock().await;
        inner.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn update(&self, key: impl Into<String>, value: Value) -> Result<Entry, StoreError> {
        let key = key.into();
        record_op("update");
        self.mutate(|entries| match entries.get_mut(&key) {
            Some(slot) => {
                *slot = value.clone();
                Ok((Entry::new(key, value), true))
            }
            None => Err(StoreError::KeyNotFound(key)),
        })
        .await
    }

    /// Remove `key`, returning the removed entry.
    pub async fn delete(&self, key: &str) -> Result<Entry, StoreError> {
        record_op("delete");
        self.mutate(|entries| match entries.remove(key) {
            Some(value) => Ok((Entry::new(key, value), true)),
            None => Err(StoreError::KeyNotFound(key.to_string())),
        })
        .await
    }

    /// Best-effort batch delete; one snapshot request covers the whole batch.
    pub async fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> BTreeMap<String, DeleteOutcome> {
        record_op("delete_many");
        let result = self
            .mutate(|entries| {
                let mut outcomes = BTreeMap::new();
                for key in keys {
                    let key = key.as_ref();
                    let outcome = match entries.remove(key) {
                        Some(_) => DeleteOutcome::Deleted,
                        None if outcomes.get(key) == Some(&DeleteOutcome::Deleted) => DeleteOutcome::Deleted,
                        None => DeleteOutcome::NotFound,
                    };
                    outcomes.insert(key.to_string(), outcome);
                }
                let changed = outcomes.values().any(|o| o.is_deleted());
                Ok((outcomes, changed))
            })
            .await;
        result.unwrap_or_default()
    }

    /// Apply `f` under the lock; when it reports a change and the policy allows,
    /// enqueue a snapshot after releasing the lock.
    async fn mutate<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Entries) -> Result<(R, bool), StoreError>,
    {
        let (result, request) = {
            let mut inner = self.inner.lock().await;
            let (result, changed) = f(&mut inner.entries)?;
            let request = if changed { inner.snapshot_request(&self.config) } else { None };
            (result, request)
        };

        if let Some((job, jobs)) = request {
            if jobs.send(job).await.is_ok() {
                SNAPSHOT_REQUESTS_TOTAL.inc();
            } else {
                debug!("write scheduler stopped; snapshot request dropped");
            }
        }
        Ok(result)
    }
}

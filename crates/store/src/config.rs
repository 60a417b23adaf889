use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const DEFAULT_QUEUE_CAPACITY: usize = 2;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(1500);

/// Durability settings of a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Snapshot file; `None` keeps everything in memory.
    pub location: Option<PathBuf>,
    /// Load from `location` if present but never write to it.
    pub memory_only: bool,
    pub continuous_write: bool,
    pub write_interval_minutes: u64,
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            location: None,
            memory_only: false,
            continuous_write: false,
            write_interval_minutes: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl PersistenceConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self { location: Some(path.into()), ..Self::default() }
    }

    pub fn with_continuous_write(mut self, on: bool) -> Self {
        self.continuous_write = on;
        self
    }

    pub fn with_write_interval(mut self, minutes: u64) -> Self {
        self.write_interval_minutes = minutes;
        self
    }

    pub fn with_memory_only(mut self, on: bool) -> Self {
        self.memory_only = on;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Empty paths count as no location.
    pub fn location(&self) -> Option<&PathBuf> {
        self.location.as_ref().filter(|p| !p.as_os_str().is_empty())
    }

    pub fn is_durable(&self) -> bool {
        self.location().is_some() && !self.memory_only
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_secs(self.write_interval_minutes.saturating_mul(60))
    }

    /// Whether a mutation at `now` should enqueue a snapshot, given the timestamp
    /// of the last accepted write.
    pub fn should_request(&self, last_accepted: Instant, now: Instant) -> bool {
        if !self.is_durable() {
            return false;
        }
        if self.write_interval_minutes == 0 {
            return self.continuous_write;
        }
        match last_accepted.checked_add(self.write_interval()) {
            Some(eligible_at) => now >= eligible_at,
            None => false,
        }
    }
}

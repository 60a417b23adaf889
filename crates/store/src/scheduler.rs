//! Background snapshot writer.
//!
//! A single worker task owns the snapshot target. The store feeds it full-state
//! copies over a small bounded queue; the worker coalesces whatever is queued,
//! drops anything not newer than the last accepted write and persists the rest.
//! Shutdown is an explicit one-shot stop carrying the final snapshot, answered by a
//! one-shot acknowledgment once the final write is done.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::metrics::{SNAPSHOT_FAILURES_TOTAL, SNAPSHOT_STALE_TOTAL, SNAPSHOT_WRITES_TOTAL};
use crate::storage::SnapshotTarget;
use crate::types::Entries;

/// Full copy of the store taken at `timestamp`.
#[derive(Debug, Clone)]
pub struct SnapshotJob {
    pub timestamp: Instant,
    pub data: Entries,
}

impl SnapshotJob {
    pub fn new(timestamp: Instant, data: Entries) -> Self {
        Self { timestamp, data }
    }
}

struct StopRequest {
    final_job: SnapshotJob,
    ack: oneshot::Sender<Result<(), StoreError>>,
}

/// Producer side of a running scheduler.
pub struct SchedulerHandle {
    jobs: mpsc::Sender<SnapshotJob>,
    last_accepted: watch::Receiver<Instant>,
    stop: oneshot::Sender<StopRequest>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn jobs(&self) -> mpsc::Sender<SnapshotJob> {
        self.jobs.clone()
    }

    /// Timestamp of the last snapshot the worker accepted and wrote.
    pub fn last_accepted(&self) -> watch::Receiver<Instant> {
        self.last_accepted.clone()
    }

    /// Hand over the final snapshot, wait for it to be written and for the worker
    /// to exit.
    pub async fn shutdown(self, final_job: SnapshotJob) -> Result<(), StoreError> {
        let SchedulerHandle { jobs, stop, task, .. } = self;
        drop(jobs);

        let (ack_tx, ack_rx) = oneshot::channel();
        if stop.send(StopRequest { final_job, ack: ack_tx }).is_err() {
            return Err(StoreError::Io("write scheduler exited before shutdown".into()));
        }
        let result = ack_rx.await.unwrap_or_else(|_| {
            Err(StoreError::Io("write scheduler dropped the shutdown acknowledgment".into()))
        });
        if let Err(e) = task.await {
            warn!(error = %e, "write scheduler task join error");
        }
        result
    }
}

pub struct WriteScheduler {
    target: Arc<dyn SnapshotTarget>,
    jobs: mpsc::Receiver<SnapshotJob>,
    stop: oneshot::Receiver<StopRequest>,
    last_accepted: Instant,
    accepted_tx: watch::Sender<Instant>,
    errors: mpsc::Sender<StoreError>,
    drain_timeout: Duration,
}

impl WriteScheduler {
    /// Spawn the worker on the current runtime. `started` seeds the last accepted
    /// write, so only jobs stamped after it are ever written.
    pub fn spawn(
        target: Arc<dyn SnapshotTarget>,
        queue_capacity: usize,
        drain_timeout: Duration,
        errors: mpsc::Sender<StoreError>,
        started: Instant,
    ) -> SchedulerHandle {
        let (jobs_tx, jobs_rx) = mpsc::channel(queue_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (accepted_tx, accepted_rx) = watch::channel(started);

        let worker = WriteScheduler {
            target,
            jobs: jobs_rx,
            stop: stop_rx,
            last_accepted: started,
            accepted_tx,
            errors,
            drain_timeout,
        };
        let task = tokio::spawn(worker.run());

        SchedulerHandle { jobs: jobs_tx, last_accepted: accepted_rx, stop: stop_tx, task }
    }

    async fn run(mut self) {
        debug!(drain_timeout = ?self.drain_timeout, "write scheduler started");
        loop {
            tokio::select! {
                biased;
                stop = &mut self.stop => {
                    self.finish(stop.ok()).await;
                    break;
                }
                job = self.jobs.recv() => match job {
                    Some(job) => {
                        let job = self.coalesce(job);
                        if let Err(e) = self.persist(job).await {
                            self.report(e);
                        }
                    }
                    None => {
                        // producers are gone; only the stop signal can still arrive
                        let stop = (&mut self.stop).await;
                        self.finish(stop.ok()).await;
                        break;
                    }
                },
            }
        }
        info!("write scheduler stopped");
    }

    /// Keep the newest of `job` and everything already waiting in the queue.
    fn coalesce(&mut self, mut job: SnapshotJob) -> SnapshotJob {
        while let Ok(next) = self.jobs.try_recv() {
            job = keep_newer(job, next);
        }
        job
    }

    /// Write `job` if it was stamped after the last accepted write finished.
    /// Returns whether a write happened.
    async fn persist(&mut self, job: SnapshotJob) -> Result<bool, StoreError> {
        if job.timestamp <= self.last_accepted {
            SNAPSHOT_STALE_TOTAL.inc();
            debug!(keys = job.data.len(), "dropping superseded snapshot");
            return Ok(false);
        }
        self.write(&job).await?;
        Ok(true)
    }

    /// Save through the target and mark the completion time as the last
    /// accepted write.
    async fn write(&mut self, job: &SnapshotJob) -> Result<(), StoreError> {
        if let Err(e) = self.target.save(&job.data).await {
            SNAPSHOT_FAILURES_TOTAL.inc();
            return Err(e);
        }
        let now = Instant::now();
        self.last_accepted = now;
        let _ = self.accepted_tx.send(now);
        SNAPSHOT_WRITES_TOTAL.inc();
        debug!(keys = job.data.len(), "snapshot written");
        Ok(())
    }

    async fn finish(&mut self, stop: Option<StopRequest>) {
        match stop {
            Some(StopRequest { final_job, ack }) => {
                let result = self.drain(final_job).await;
                if let Err(e) = &result {
                    self.report(e.clone());
                }
                let _ = ack.send(result);
            }
            None => warn!("write scheduler handle dropped without shutdown; final snapshot skipped"),
        }
    }

    /// Stop accepting jobs, fold in what is already queued and write the newest
    /// state once. The final write skips the freshness check: the final job may
    /// have been stamped while the last regular write was still in flight.
    /// `drain_timeout` bounds that write; on expiry the previous snapshot file is
    /// left in place and a soft `ShutdownDrainTimeout` is reported.
    async fn drain(&mut self, final_job: SnapshotJob) -> Result<(), StoreError> {
        info!("write scheduler draining");
        self.jobs.close();

        let mut newest = final_job;
        while let Ok(job) = self.jobs.try_recv() {
            newest = keep_newer(newest, job);
        }

        let timeout = self.drain_timeout;
        match tokio::time::timeout(timeout, self.write(&newest)).await {
            Ok(result) => result,
            Err(_) => {
                let e = StoreError::ShutdownDrainTimeout(timeout);
                warn!(error = %e, keys = newest.data.len(), "final snapshot abandoned");
                self.report(e);
                Ok(())
            }
        }
    }

    fn report(&self, err: StoreError) {
        warn!(error = %err, "write scheduler error");
        match self.errors.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(e)) => {
                warn!(error = %e, "error stream full; dropping error");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// The newer of two jobs; the other one is counted as superseded.
fn keep_newer(current: SnapshotJob, candidate: SnapshotJob) -> SnapshotJob {
    SNAPSHOT_STALE_TOTAL.inc();
    if candidate.timestamp > current.timestamp {
        candidate
    } else {
        current
    }
}

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder};

// Prometheus metrics (default registry)
pub static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "kvstore_operations_total",
        "Store operations by kind",
        &["op"]
    )
    .expect("register operations_total")
});

pub static SNAPSHOT_REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kvstore_snapshot_requests_total",
        "Snapshot jobs enqueued by the store"
    )
    .expect("register snapshot_requests_total")
});

pub static SNAPSHOT_WRITES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kvstore_snapshot_writes_total",
        "Snapshots written to the backing file"
    )
    .expect("register snapshot_writes_total")
});

pub static SNAPSHOT_STALE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kvstore_snapshot_stale_total",
        "Snapshot jobs dropped as superseded"
    )
    .expect("register snapshot_stale_total")
});

pub static SNAPSHOT_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "kvstore_snapshot_failures_total",
        "Snapshot writes that failed"
    )
    .expect("register snapshot_failures_total")
});

pub(crate) fn record_op(op: &str) {
    OPERATIONS_TOTAL.with_label_values(&[op]).inc();
}

/// Render the default registry in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

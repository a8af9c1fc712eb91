use gateway_o11y::metrics::{
    HistogramVec, IntCounter, IntCounterVec, exponential_buckets, try_create_histogram_vec,
    try_create_int_counter, try_create_int_counter_vec,
};
use std::sync::LazyLock;

pub(crate) static RELAY_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    try_create_int_counter_vec(
        "gateway_relay_total",
        "Relay attempts dispatched, by blockchain and result code",
        &["blockchain", "result"],
    )
    .unwrap()
});

pub(crate) static RELAY_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    try_create_histogram_vec(
        "gateway_relay_latency_seconds",
        "Wall-clock latency of relay attempts",
        &["blockchain"],
        Some(exponential_buckets(0.001, 1.6, 25).unwrap()),
    )
    .unwrap()
});

pub(crate) static RECORDS_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "gateway_metrics_records_dropped_total",
        "Relay records evicted from the durable-sink buffer on overflow",
    )
    .unwrap()
});

pub(crate) static SINK_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    try_create_int_counter(
        "gateway_metrics_sink_failures_total",
        "Failed batch writes to the durable metrics sink",
    )
    .unwrap()
});

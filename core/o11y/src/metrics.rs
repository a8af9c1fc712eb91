//! A fork of the lighthouse_metrics crate used to provide prometheus
//! metric registration with a single default registry. Metrics are declared
//! as `LazyLock` statics next to the code they instrument.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::LazyLock;
//! use gateway_o11y::metrics::{IntCounterVec, try_create_int_counter_vec};
//!
//! static RELAY_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
//!     try_create_int_counter_vec(
//!         "gateway_relay_total",
//!         "Total relays dispatched, by chain and result",
//!         &["blockchain", "result"],
//!     )
//!     .unwrap()
//! });
//! ```

pub use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder, exponential_buckets,
};
use prometheus::{HistogramOpts, Opts};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

type Result<T> = std::result::Result<T, MetricsError>;

/// Attempts to create an `IntCounter`, returning `Err` if the registry does
/// not accept the counter (potentially due to naming conflict).
pub fn try_create_int_counter(name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Attempts to create an `IntCounterVec`, returning `Err` if the registry
/// does not accept the counter (potentially due to naming conflict).
pub fn try_create_int_counter_vec(
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Attempts to create an `IntGauge`, returning `Err` if the registry does
/// not accept the gauge (potentially due to naming conflict).
pub fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Attempts to create an `IntGaugeVec`, returning `Err` if the registry does
/// not accept the gauge (potentially due to naming conflict).
pub fn try_create_int_gauge_vec(name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels)?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Attempts to create a `Histogram`, returning `Err` if the registry does
/// not accept the histogram (potentially due to naming conflict).
pub fn try_create_histogram(name: &str, help: &str) -> Result<Histogram> {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help))?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

/// Attempts to create a `HistogramVec`, returning `Err` if the registry does
/// not accept the histogram (potentially due to naming conflict).
pub fn try_create_histogram_vec(
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Option<Vec<f64>>,
) -> Result<HistogramVec> {
    let mut opts = HistogramOpts::new(name, help);
    if let Some(buckets) = buckets {
        opts = opts.buckets(buckets);
    }
    let histogram = HistogramVec::new(opts, labels)?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

/// Exposition of the default registry in the prometheus text format, served
/// by the HTTP ingress under `/metrics`.
pub fn export_text() -> Vec<u8> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&prometheus::default_registry().gather(), &mut buffer).unwrap_or_else(|err| {
        tracing::error!(target: "metrics", ?err, "failed to encode prometheus metrics");
    });
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_export() {
        let counter =
            try_create_int_counter_vec("gateway_o11y_test_total", "test counter", &["label"])
                .unwrap();
        counter.with_label_values(&["a"]).inc();
        let text = String::from_utf8(export_text()).unwrap();
        assert!(text.contains("gateway_o11y_test_total"));
        // Re-registration under the same name is rejected rather than panicking.
        assert!(try_create_int_counter_vec("gateway_o11y_test_total", "dup", &["label"]).is_err());
    }
}

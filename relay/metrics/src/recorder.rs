use crate::sink::MetricsSink;
use crate::{RelayMetric, metrics};
use gateway_cache::{Cache, CacheError, keys};
use gateway_time::Duration;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded staging buffer between the relay path and the durable sink.
/// Enqueueing never blocks; on overflow the oldest non-success record is
/// evicted first, then the oldest outright.
pub struct MetricsBuffer {
    queue: Mutex<VecDeque<RelayMetric>>,
    capacity: usize,
}

impl MetricsBuffer {
    pub fn new(capacity: usize) -> Arc<MetricsBuffer> {
        Arc::new(MetricsBuffer { queue: Mutex::new(VecDeque::new()), capacity })
    }

    pub fn push(&self, metric: RelayMetric) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            match queue.iter().position(|record| !record.is_success()) {
                Some(position) => {
                    queue.remove(position);
                }
                None => {
                    queue.pop_front();
                }
            }
            metrics::RECORDS_DROPPED.inc();
        }
        queue.push_back(metric);
    }

    pub fn drain(&self) -> Vec<RelayMetric> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Records one `RelayMetric` per relay attempt: prometheus counters, the
/// per-node service log in the cache, and the durable buffer. Errors along
/// the way are logged and swallowed; recording never fails a relay.
pub struct MetricsRecorder {
    cache: Arc<dyn Cache>,
    buffer: Arc<MetricsBuffer>,
}

impl MetricsRecorder {
    pub fn new(cache: Arc<dyn Cache>, buffer: Arc<MetricsBuffer>) -> MetricsRecorder {
        MetricsRecorder { cache, buffer }
    }

    pub async fn record(&self, metric: RelayMetric) {
        metrics::RELAY_TOTAL
            .with_label_values(&[&metric.blockchain, &metric.result.to_string()])
            .inc();
        metrics::RELAY_LATENCY
            .with_label_values(&[&metric.blockchain])
            .observe(metric.elapsed.as_seconds_f64());

        // Fallback posts bypass the node network and must not influence
        // node selection.
        if !metric.fallback {
            if let Some(node) = metric.service_node.clone() {
                if let Err(err) = self.update_service_log(&metric, &node).await {
                    tracing::warn!(
                        target: "metrics",
                        %node,
                        blockchain = %metric.blockchain,
                        ?err,
                        "failed to update service log, relay proceeds",
                    );
                }
            }
        }

        self.buffer.push(metric);
    }

    async fn update_service_log(
        &self,
        metric: &RelayMetric,
        node: &str,
    ) -> Result<(), CacheError> {
        let key = keys::service_log(&metric.blockchain, node);
        if metric.is_success() {
            self.cache.hincrby(&key, keys::FIELD_SUCCESS, 1).await?;
            self.cache
                .hincrby(&key, keys::FIELD_ELAPSED_SUM, metric.elapsed.whole_milliseconds() as i64)
                .await?;
            self.cache.hincrby(&key, keys::FIELD_ELAPSED_COUNT, 1).await?;
        } else {
            self.cache.hincrby(&key, keys::FIELD_FAILURE, 1).await?;
        }
        self.cache.expire(&key, keys::SERVICE_LOG_TTL).await
    }
}

/// Spawns the background loop draining the buffer into the durable sink.
/// The relay path never waits on the sink.
pub fn spawn_flush_loop(
    buffer: Arc<MetricsBuffer>,
    sink: Arc<dyn MetricsSink>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    let mut interval = tokio::time::interval(period.unsigned_abs());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::spawn(async move {
        tracing::debug!(target: "metrics", "starting the metrics flush loop");
        loop {
            interval.tick().await;
            let batch = buffer.drain();
            if batch.is_empty() {
                continue;
            }
            let batch_len = batch.len();
            if let Err(err) = sink.write_batch(batch).await {
                metrics::SINK_FAILURES.inc();
                tracing::error!(target: "metrics", batch_len, ?err, "failed to flush relay records");
            }
        }
    })
}

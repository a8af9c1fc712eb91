//! Relay metrics: every relay attempt (client relays, sync/chain probes,
//! fallback posts) produces exactly one `RelayMetric`. Records feed three
//! consumers: the per-node service logs in the cache (cherry-picker input),
//! prometheus counters, and the durable relational sink.

use gateway_primitives::types::{ApplicationId, BlockchainId, NodePublicKey, RequestId};
use gateway_time::{Duration, Utc};

mod metrics;
mod recorder;
mod sink;

pub use recorder::{MetricsBuffer, MetricsRecorder, spawn_flush_loop};
pub use sink::{MetricsSink, SqliteSink, testonly};

/// Method label attached to sync-check probe metrics.
pub const METHOD_SYNC_CHECK: &str = "synccheck";

/// Method label attached to chain-check probe metrics.
pub const METHOD_CHAIN_CHECK: &str = "chaincheck";

/// One relay attempt, as written to the durable `relay` table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RelayMetric {
    pub request_id: RequestId,
    pub application_id: ApplicationId,
    pub app_public_key: String,
    pub blockchain: BlockchainId,
    /// Absent for fallback posts, which bypass the node network.
    pub service_node: Option<NodePublicKey>,
    pub relay_start: Utc,
    pub elapsed: Duration,
    /// HTTP-style result code: 200 on success, 500 on failure.
    pub result: u32,
    pub bytes: usize,
    pub delivered: bool,
    pub fallback: bool,
    /// JSON-RPC method, or `synccheck`/`chaincheck` for probes.
    pub method: String,
    pub error: Option<String>,
}

impl RelayMetric {
    pub fn is_success(&self) -> bool {
        self.result == 200
    }
}

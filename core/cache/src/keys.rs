//! Every cache key namespace and TTL the gateway uses, in one place. The
//! key strings are a cross-process protocol: probers and consumers on
//! different gateway instances must agree on them byte for byte.

use gateway_time::Duration;

/// Cached application and load balancer records.
pub const CONFIG_RECORD_TTL: Duration = Duration::seconds(60);

/// Per-(chain, node) rolling service logs feeding the cherry-picker.
pub const SERVICE_LOG_TTL: Duration = Duration::seconds(60);

/// Verified (in-sync / right-chain) node sets.
pub const VERIFIED_NODES_TTL: Duration = Duration::seconds(300);

/// Probe locks. A crashed prober's lock expires and the next request
/// re-elects a prober.
pub const PROBE_LOCK_TTL: Duration = Duration::seconds(60);

/// Fields of the service-log hash.
pub const FIELD_SUCCESS: &str = "success_count";
pub const FIELD_FAILURE: &str = "failure_count";
pub const FIELD_ELAPSED_SUM: &str = "elapsed_sum";
pub const FIELD_ELAPSED_COUNT: &str = "elapsed_count";

pub fn application(id: &str) -> String {
    format!("app-{id}")
}

pub fn load_balancer(id: &str) -> String {
    format!("lb-{id}")
}

/// Hash holding `{success_count, failure_count, elapsed_sum,
/// elapsed_count}` for one node on one chain.
pub fn service_log(chain: &str, node_public_key: &str) -> String {
    format!("service-{chain}-{node_public_key}")
}

/// Node set verified to be at the chain tip, namespaced by the session
/// fingerprint: a changed session makes the old entry unreachable.
pub fn synced_nodes(chain: &str, session_fingerprint: &str) -> String {
    format!("{chain}-{session_fingerprint}")
}

/// Node set verified to serve the declared chain ID.
pub fn chain_checked_nodes(chain: &str, session_fingerprint: &str) -> String {
    format!("{chain}-chain-{session_fingerprint}")
}

/// Lock electing a single prober for `key` across the gateway fleet.
pub fn probe_lock(key: &str) -> String {
    format!("lock-{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // The exact key strings are load-bearing: instances of different
    // gateway versions share one cache.
    #[test]
    fn key_formats_are_stable() {
        assert_eq!(service_log("0021", "abcd"), "service-0021-abcd");
        assert_eq!(synced_nodes("0021", "f00d"), "0021-f00d");
        assert_eq!(chain_checked_nodes("0021", "f00d"), "0021-chain-f00d");
        assert_eq!(probe_lock("0021-f00d"), "lock-0021-f00d");
        assert_eq!(application("a1"), "app-a1");
        assert_eq!(load_balancer("lb1"), "lb-lb1");
    }
}

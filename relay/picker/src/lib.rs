//! Cherry-picker: selects the service node a relay goes to, ranking the
//! session's nodes by their rolling service logs. Nodes with a proven
//! success rate are preferred; within a tier the draw is weighted towards
//! low observed latency.

use gateway_cache::{Cache, keys};
use gateway_primitives::errors::UpstreamError;
use gateway_primitives::session::SessionNode;
use gateway_primitives::types::NodePublicKey;
use rand::distributions::{Distribution, WeightedIndex};
use rand::thread_rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Observations below this leave a node unweighted: its success rate is
/// not yet trusted and it stays probationary.
const MIN_OBSERVATIONS: i64 = 5;

/// Latency assumed for nodes with no recorded latency. Large enough that
/// any node with real measurements wins the weighting.
const DEFAULT_LATENCY_MS: f64 = 60_000.0;

const PREFERRED_SUCCESS_RATE: f64 = 0.95;
const ACCEPTABLE_SUCCESS_RATE: f64 = 0.5;

/// Point-in-time snapshot of one node's service-log hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceLog {
    pub success: i64,
    pub failure: i64,
    pub elapsed_sum_ms: i64,
    pub elapsed_count: i64,
}

impl ServiceLog {
    pub fn from_hash(hash: &HashMap<String, String>) -> ServiceLog {
        fn field(hash: &HashMap<String, String>, name: &str) -> i64 {
            hash.get(name).and_then(|raw| raw.parse().ok()).unwrap_or(0)
        }
        ServiceLog {
            success: field(hash, keys::FIELD_SUCCESS),
            failure: field(hash, keys::FIELD_FAILURE),
            elapsed_sum_ms: field(hash, keys::FIELD_ELAPSED_SUM),
            elapsed_count: field(hash, keys::FIELD_ELAPSED_COUNT),
        }
    }

    pub fn observations(&self) -> i64 {
        self.success + self.failure
    }

    /// `None` until the node has enough observations to be weighted.
    pub fn success_rate(&self) -> Option<f64> {
        if self.observations() < MIN_OBSERVATIONS {
            return None;
        }
        Some(self.success as f64 / self.observations() as f64)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.elapsed_count > 0 {
            self.elapsed_sum_ms as f64 / self.elapsed_count as f64
        } else {
            DEFAULT_LATENCY_MS
        }
    }
}

/// Ranking tiers. A lower tier is always exhausted before a higher one is
/// considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    /// Proven reliable: success rate at least 0.95.
    Preferred,
    /// Working but degraded: success rate in [0.5, 0.95).
    Acceptable,
    /// Failing or not yet measured.
    Probationary,
}

fn tier(log: &ServiceLog) -> Tier {
    match log.success_rate() {
        Some(rate) if rate >= PREFERRED_SUCCESS_RATE => Tier::Preferred,
        Some(rate) if rate >= ACCEPTABLE_SUCCESS_RATE => Tier::Acceptable,
        _ => Tier::Probationary,
    }
}

pub struct CherryPicker {
    cache: Arc<dyn Cache>,
}

impl CherryPicker {
    pub fn new(cache: Arc<dyn Cache>) -> CherryPicker {
        CherryPicker { cache }
    }

    /// Picks one node from `nodes \ excluded` for a relay on `chain`.
    /// Candidates are sorted by public key before the draw so that equal
    /// weights resolve deterministically under a seeded RNG.
    pub async fn pick(
        &self,
        chain: &str,
        nodes: &[SessionNode],
        excluded: &HashSet<NodePublicKey>,
    ) -> Result<SessionNode, UpstreamError> {
        let mut candidates: Vec<&SessionNode> =
            nodes.iter().filter(|node| !excluded.contains(&node.public_key)).collect();
        candidates.sort_by(|a, b| a.public_key.cmp(&b.public_key));

        let mut scored = Vec::with_capacity(candidates.len());
        for node in candidates {
            let log = self.service_log(chain, &node.public_key).await;
            scored.push((node, tier(&log), log.avg_latency_ms()));
        }
        let Some(best) = scored.iter().map(|(_, tier, _)| *tier).min() else {
            return Err(UpstreamError::NoHealthyNodes);
        };
        let tier_nodes: Vec<(&SessionNode, f64)> = scored
            .into_iter()
            .filter(|(_, tier, _)| *tier == best)
            .map(|(node, _, latency)| (node, latency))
            .collect();
        let chosen = pick_weighted(&tier_nodes);
        tracing::debug!(
            target: "picker",
            chain,
            node = %chosen.public_key,
            ?best,
            candidates = tier_nodes.len(),
            "picked node",
        );
        Ok(chosen.clone())
    }

    async fn service_log(&self, chain: &str, node: &str) -> ServiceLog {
        match self.cache.hgetall(&keys::service_log(chain, node)).await {
            Ok(hash) => ServiceLog::from_hash(&hash),
            Err(err) => {
                tracing::warn!(target: "picker", node, ?err, "service log unavailable");
                ServiceLog::default()
            }
        }
    }
}

/// Weighted draw by inverse latency. Latencies are clamped to 1ms so a
/// node measured faster than the clock resolution cannot absorb the whole
/// distribution.
fn pick_weighted<'a>(tier_nodes: &[(&'a SessionNode, f64)]) -> &'a SessionNode {
    let weights: Vec<f64> = tier_nodes.iter().map(|(_, latency)| 1.0 / latency.max(1.0)).collect();
    match WeightedIndex::new(&weights) {
        Ok(distribution) => tier_nodes[distribution.sample(&mut thread_rng())].0,
        Err(err) => {
            tracing::warn!(target: "picker", ?err, "degenerate weights, using first candidate");
            tier_nodes[0].0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_cache::testonly::InMemoryCache;
    use gateway_primitives::testonly::test_node;
    use gateway_time::FakeClock;

    async fn seed_log(cache: &InMemoryCache, node: &str, log: ServiceLog) {
        let key = keys::service_log("0021", node);
        cache.hincrby(&key, keys::FIELD_SUCCESS, log.success).await.unwrap();
        cache.hincrby(&key, keys::FIELD_FAILURE, log.failure).await.unwrap();
        cache.hincrby(&key, keys::FIELD_ELAPSED_SUM, log.elapsed_sum_ms).await.unwrap();
        cache.hincrby(&key, keys::FIELD_ELAPSED_COUNT, log.elapsed_count).await.unwrap();
    }

    fn log(success: i64, failure: i64, avg_latency_ms: i64) -> ServiceLog {
        let observations = success + failure;
        ServiceLog {
            success,
            failure,
            elapsed_sum_ms: avg_latency_ms * observations,
            elapsed_count: observations,
        }
    }

    #[tokio::test]
    async fn tier_precedence_and_latency_weighting() {
        let cache = Arc::new(InMemoryCache::new(FakeClock::default().clock()));
        seed_log(&cache, "aaaa", log(99, 1, 200)).await;
        seed_log(&cache, "bbbb", log(99, 1, 50)).await;
        seed_log(&cache, "cccc", log(60, 40, 10)).await;
        let picker = CherryPicker::new(cache);
        let nodes = vec![test_node("aaaa"), test_node("bbbb"), test_node("cccc")];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..2000 {
            let chosen = picker.pick("0021", &nodes, &HashSet::new()).await.unwrap();
            *counts.entry(chosen.public_key).or_insert(0) += 1;
        }
        // The acceptable-tier node is never picked while preferred nodes
        // exist, and the faster preferred node dominates the draw.
        assert_eq!(counts.get("cccc"), None);
        let slow = counts["aaaa"];
        let fast = counts["bbbb"];
        assert!(fast >= 3 * slow, "fast={fast} slow={slow}");
    }

    #[tokio::test]
    async fn unmeasured_nodes_are_probationary() {
        let cache = Arc::new(InMemoryCache::new(FakeClock::default().clock()));
        // Four observations only: a perfect record is still not trusted.
        seed_log(&cache, "new1", log(4, 0, 5)).await;
        seed_log(&cache, "good", log(95, 5, 300)).await;
        let picker = CherryPicker::new(cache);
        let nodes = vec![test_node("new1"), test_node("good")];
        for _ in 0..50 {
            let chosen = picker.pick("0021", &nodes, &HashSet::new()).await.unwrap();
            assert_eq!(chosen.public_key, "good");
        }
    }

    #[tokio::test]
    async fn probationary_tier_serves_when_alone() {
        let cache = Arc::new(InMemoryCache::new(FakeClock::default().clock()));
        let picker = CherryPicker::new(cache);
        let nodes = vec![test_node("aaaa"), test_node("bbbb")];
        let chosen = picker.pick("0021", &nodes, &HashSet::new()).await.unwrap();
        assert!(nodes.contains(&chosen));
    }

    #[tokio::test]
    async fn exclusions_can_empty_the_candidate_set() {
        let cache = Arc::new(InMemoryCache::new(FakeClock::default().clock()));
        let picker = CherryPicker::new(cache);
        let nodes = vec![test_node("aaaa")];
        let excluded: HashSet<_> = ["aaaa".to_owned()].into();
        let err = picker.pick("0021", &nodes, &excluded).await.unwrap_err();
        assert_eq!(err, UpstreamError::NoHealthyNodes);
    }

    #[tokio::test]
    async fn cache_outage_degrades_to_uniform_probation() {
        let cache = Arc::new(InMemoryCache::new(FakeClock::default().clock()));
        cache.set_failing(true);
        let picker = CherryPicker::new(cache);
        let nodes = vec![test_node("aaaa"), test_node("bbbb")];
        // Logs unavailable: every node is probationary but picking works.
        let chosen = picker.pick("0021", &nodes, &HashSet::new()).await.unwrap();
        assert!(nodes.contains(&chosen));
    }
}

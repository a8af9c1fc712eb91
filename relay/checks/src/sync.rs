use crate::ProbeContext;
use crate::common::{
    MIN_USABLE_PROBES, acquire_probe_lock, jsonrpc_result, parse_hex_quantity,
    persist_verified_set, probe_node, read_verified_set,
};
use futures::future::join_all;
use gateway_cache::{Cache, keys};
use gateway_metrics::{METHOD_SYNC_CHECK, MetricsRecorder};
use gateway_primitives::relay::RelayAttempt;
use gateway_primitives::session::{NodeSyncLog, SessionNode, session_fingerprint};
use gateway_time::Clock;
use std::sync::Arc;

/// When fewer nodes than this are in sync, a consensus challenge is fired
/// to let the network penalize the laggards.
const CHALLENGE_THRESHOLD: usize = 5;

/// Filters a session's nodes down to the subset verified to be at the
/// chain's tip. The verified subset is cached for the session fingerprint;
/// a probing pass runs at most once per fingerprint per lock window across
/// the whole fleet.
pub struct SyncChecker {
    cache: Arc<dyn Cache>,
    recorder: Arc<MetricsRecorder>,
    clock: Clock,
}

impl SyncChecker {
    pub fn new(cache: Arc<dyn Cache>, recorder: Arc<MetricsRecorder>, clock: Clock) -> SyncChecker {
        SyncChecker { cache, recorder, clock }
    }

    /// Returns the in-sync subset of `nodes`, or `nodes` unchanged whenever
    /// the verdict is uncertain.
    pub async fn filter(&self, ctx: &ProbeContext, nodes: Vec<SessionNode>) -> Vec<SessionNode> {
        let Some(options) = ctx.blockchain.sync_check.clone() else {
            return nodes;
        };
        let fingerprint = session_fingerprint(&nodes);
        let key = keys::synced_nodes(&ctx.blockchain.id, &fingerprint);

        if let Some(verified) = read_verified_set(&*self.cache, &key).await {
            return nodes.into_iter().filter(|node| verified.contains(&node.public_key)).collect();
        }
        if !acquire_probe_lock(&*self.cache, &key).await {
            // Another prober is at work; serve the unfiltered set until it
            // publishes.
            return nodes;
        }

        let probes = nodes.iter().map(|node| self.probe_height(ctx, node, &options.payload));
        let logs: Vec<NodeSyncLog> = join_all(probes).await.into_iter().flatten().collect();
        if logs.len() < MIN_USABLE_PROBES {
            tracing::error!(
                target: "sync",
                chain = %ctx.blockchain.id,
                usable = logs.len(),
                nodes = nodes.len(),
                "not enough sync probes succeeded, serving the unfiltered session",
            );
            return nodes;
        }

        let mut heights: Vec<u64> = logs.iter().map(|log| log.block_height).collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        // With the top two reporters more than one block apart, one of them
        // is an outlier and no height can be trusted as the tip.
        if heights[0] > heights[1] + 1 {
            tracing::warn!(
                target: "sync",
                chain = %ctx.blockchain.id,
                top = heights[0],
                second = heights[1],
                "sync probes disagree on the tip, serving the unfiltered session",
            );
            return nodes;
        }
        let tip = heights[0];

        let in_sync: Vec<String> = logs
            .iter()
            .filter(|log| log.block_height + options.allowance >= tip)
            .map(|log| log.node.public_key.clone())
            .collect();
        tracing::info!(
            target: "sync",
            chain = %ctx.blockchain.id,
            tip,
            in_sync = in_sync.len(),
            probed = logs.len(),
            "sync check complete",
        );
        persist_verified_set(&*self.cache, &key, &in_sync).await;

        if in_sync.len() < CHALLENGE_THRESHOLD {
            self.spawn_consensus_challenge(ctx, options.payload.clone());
        }

        nodes.into_iter().filter(|node| in_sync.contains(&node.public_key)).collect()
    }

    async fn probe_height(
        &self,
        ctx: &ProbeContext,
        node: &SessionNode,
        payload: &str,
    ) -> Option<NodeSyncLog> {
        let response =
            probe_node(ctx, &self.recorder, &self.clock, node, payload, METHOD_SYNC_CHECK).await?;
        let height = jsonrpc_result(&response.payload).as_deref().and_then(parse_hex_quantity);
        match height {
            Some(block_height) => Some(NodeSyncLog {
                node: node.clone(),
                chain_id: ctx.blockchain.id.clone(),
                block_height,
            }),
            None => {
                tracing::debug!(
                    target: "sync",
                    node = %node.public_key,
                    "sync probe returned an unparseable height",
                );
                None
            }
        }
    }

    /// Dispatches a consensus relay to let the network majority-vote the
    /// tip and penalize dissenters. Detached: the client's relay never
    /// waits for it.
    fn spawn_consensus_challenge(&self, ctx: &ProbeContext, payload: String) {
        let sender = ctx.relay_sender.clone();
        let blockchain = ctx.blockchain.clone();
        let aat = ctx.aat.clone();
        let config = ctx.consensus_config.clone();
        tokio::spawn(async move {
            let result = sender
                .send(RelayAttempt {
                    blockchain: &blockchain.id,
                    payload: payload.as_bytes(),
                    path: "",
                    aat: &aat,
                    config,
                    node: None,
                    consensus: true,
                })
                .await;
            match result {
                Ok(_) => {
                    tracing::info!(target: "sync", chain = %blockchain.id, "consensus challenge dispatched")
                }
                Err(err) => {
                    tracing::warn!(target: "sync", chain = %blockchain.id, %err, "consensus challenge failed")
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_cache::testonly::InMemoryCache;
    use gateway_configs::PocketConfiguration;
    use gateway_metrics::MetricsBuffer;
    use gateway_primitives::testonly::{
        ScriptedRelaySender, test_aat, test_blockchain, test_node,
    };
    use gateway_time::FakeClock;

    struct Fixture {
        cache: Arc<InMemoryCache>,
        buffer: Arc<MetricsBuffer>,
        sender: Arc<ScriptedRelaySender>,
        checker: SyncChecker,
        ctx: ProbeContext,
        nodes: Vec<SessionNode>,
    }

    fn fixture(node_keys: &[&str]) -> Fixture {
        let clock = FakeClock::default().clock();
        let cache = Arc::new(InMemoryCache::new(clock.clone()));
        let buffer = MetricsBuffer::new(256);
        let recorder = Arc::new(MetricsRecorder::new(cache.clone(), buffer.clone()));
        let nodes: Vec<SessionNode> = node_keys.iter().map(|key| test_node(key)).collect();
        let sender = Arc::new(ScriptedRelaySender::new(nodes.clone()));
        let pocket = PocketConfiguration::default();
        let ctx = ProbeContext {
            blockchain: Arc::new(test_blockchain()),
            application_id: "app-1".to_owned(),
            app_public_key: "app-1-pk".to_owned(),
            aat: test_aat("app-1-pk"),
            request_id: "req-1".to_owned(),
            relay_sender: sender.clone(),
            probe_config: pocket.probe_config(),
            consensus_config: pocket.consensus_config(),
        };
        let checker = SyncChecker::new(cache.clone(), recorder, clock);
        Fixture { cache, buffer, sender, checker, ctx, nodes }
    }

    fn keys_of(nodes: &[SessionNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.public_key.as_str()).collect()
    }

    #[tokio::test]
    async fn admission_respects_the_sync_allowance() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc", "dddd"]);
        for (node, height) in [("aaaa", 100), ("bbbb", 100), ("cccc", 99), ("dddd", 98)] {
            fixture.sender.set_height(node, height);
        }
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(keys_of(&filtered), vec!["aaaa", "bbbb", "cccc"]);
        // One synccheck metric per probed node.
        assert_eq!(fixture.buffer.len(), 4);
    }

    #[tokio::test]
    async fn wider_allowance_admits_laggards() {
        let mut fixture = fixture(&["aaaa", "bbbb", "cccc", "dddd"]);
        let mut blockchain = test_blockchain();
        blockchain.sync_check.as_mut().unwrap().allowance = 2;
        fixture.ctx.blockchain = Arc::new(blockchain);
        for (node, height) in [("aaaa", 100), ("bbbb", 100), ("cccc", 99), ("dddd", 98)] {
            fixture.sender.set_height(node, height);
        }
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(filtered.len(), 4);
    }

    #[tokio::test]
    async fn behind_nodes_are_dropped() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc", "dddd"]);
        for (node, height) in [("aaaa", 100), ("bbbb", 100), ("cccc", 100), ("dddd", 90)] {
            fixture.sender.set_height(node, height);
        }
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(keys_of(&filtered), vec!["aaaa", "bbbb", "cccc"]);
    }

    #[tokio::test]
    async fn disagreeing_tip_reporters_fail_open() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc", "dddd"]);
        for (node, height) in [("aaaa", 200), ("bbbb", 100), ("cccc", 100), ("dddd", 100)] {
            fixture.sender.set_height(node, height);
        }
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        // The outlier makes the tip untrustworthy: everything is served.
        assert_eq!(filtered.len(), 4);
        // And no verified set is published.
        let fingerprint = session_fingerprint(&fixture.nodes);
        let key = keys::synced_nodes("0021", &fingerprint);
        assert_eq!(fixture.cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn too_few_usable_probes_fail_open() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc", "dddd"]);
        // Only two nodes answer; the others have no scripted height.
        fixture.sender.set_height("aaaa", 100);
        fixture.sender.set_height("bbbb", 100);
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(filtered.len(), 4);
    }

    #[tokio::test]
    async fn published_set_short_circuits_probing() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc"]);
        let fingerprint = session_fingerprint(&fixture.nodes);
        let key = keys::synced_nodes("0021", &fingerprint);
        fixture
            .cache
            .set(&key, r#"["aaaa","bbbb"]"#, keys::VERIFIED_NODES_TTL)
            .await
            .unwrap();
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(keys_of(&filtered), vec!["aaaa", "bbbb"]);
        assert!(fixture.sender.sends().is_empty());
    }

    #[tokio::test]
    async fn held_lock_serves_the_unfiltered_session() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc"]);
        let fingerprint = session_fingerprint(&fixture.nodes);
        let key = keys::synced_nodes("0021", &fingerprint);
        fixture
            .cache
            .set(&keys::probe_lock(&key), "1", keys::PROBE_LOCK_TTL)
            .await
            .unwrap();
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(filtered.len(), 3);
        assert!(fixture.sender.sends().is_empty());
    }

    #[tokio::test]
    async fn small_in_sync_set_triggers_a_detached_challenge() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc"]);
        for node in ["aaaa", "bbbb", "cccc"] {
            fixture.sender.set_height(node, 100);
        }
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(filtered.len(), 3);
        // Let the detached challenge task run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let challenges: Vec<_> =
            fixture.sender.sends().into_iter().filter(|sent| sent.consensus).collect();
        assert_eq!(challenges.len(), 1);
    }

    #[tokio::test]
    async fn cache_outage_fails_open_without_probing() {
        let fixture = fixture(&["aaaa", "bbbb", "cccc"]);
        fixture.cache.set_failing(true);
        let filtered = fixture.checker.filter(&fixture.ctx, fixture.nodes.clone()).await;
        assert_eq!(filtered.len(), 3);
        assert!(fixture.sender.sends().is_empty());
    }
}

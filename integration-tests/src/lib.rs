//! Shared fixtures for the gateway scenario tests: one orchestrator wired
//! to an in-memory cache, a scripted relay sender and a captured metrics
//! buffer.

use gateway_cache::testonly::InMemoryCache;
use gateway_configs::GatewayConfig;
use gateway_metrics::{MetricsBuffer, MetricsRecorder};
use gateway_primitives::application::LoadBalancer;
use gateway_primitives::blockchain::BlockchainDescriptor;
use gateway_primitives::errors::UpstreamError;
use gateway_primitives::session::SessionNode;
use gateway_primitives::testonly::{
    ScriptedRelaySender, test_application, test_blockchain, test_node,
};
use gateway_relayer::testonly::{ScriptedFallback, StaticRepository};
use gateway_relayer::{BlockchainRegistry, RelayOrchestrator};
use gateway_time::FakeClock;
use std::sync::Arc;

pub struct GatewayWorld {
    pub clock: FakeClock,
    pub cache: Arc<InMemoryCache>,
    pub buffer: Arc<MetricsBuffer>,
    pub repository: Arc<StaticRepository>,
    pub sender: Arc<ScriptedRelaySender>,
    pub orchestrator: Arc<RelayOrchestrator>,
}

/// A world with one application (`app-1`), one load balancer (`lb-1`) and
/// the given in-sync session nodes.
pub fn gateway_world(blockchain: BlockchainDescriptor, node_keys: &[&str]) -> GatewayWorld {
    let clock = FakeClock::default();
    let cache = Arc::new(InMemoryCache::new(clock.clock()));
    let buffer = MetricsBuffer::new(4096);
    let recorder = Arc::new(MetricsRecorder::new(cache.clone(), buffer.clone()));
    let repository = Arc::new(StaticRepository::default());
    repository.insert_application(test_application("app-1"));
    repository.insert_load_balancer(LoadBalancer {
        id: "lb-1".to_owned(),
        application_ids: vec!["app-1".to_owned()],
    });
    let nodes: Vec<SessionNode> = node_keys.iter().map(|key| test_node(key)).collect();
    let sender = Arc::new(ScriptedRelaySender::new(nodes));
    for key in node_keys {
        sender.set_height(key, 100);
    }
    let orchestrator = Arc::new(RelayOrchestrator::new(
        GatewayConfig::test(),
        clock.clock(),
        cache.clone(),
        repository.clone(),
        BlockchainRegistry::from_descriptors(vec![blockchain]),
        sender.clone(),
        recorder,
        Arc::new(ScriptedFallback::failing(UpstreamError::NoHealthyNodes)),
    ));
    GatewayWorld { clock, cache, buffer, repository, sender, orchestrator }
}

/// The default world: ethereum-shaped chain with sync checks but no
/// chain-ID check, so probe accounting stays single-dimensional.
pub fn default_world(node_keys: &[&str]) -> GatewayWorld {
    let mut blockchain = test_blockchain();
    blockchain.chain_id_check = None;
    gateway_world(blockchain, node_keys)
}

pub const CLIENT_BODY: &[u8] =
    br#"{"method":"eth_getBalance","params":["0xabc","latest"],"id":1,"jsonrpc":"2.0"}"#;

use crate::types::{BlockchainId, BlockHeight, NodePublicKey};
use sha2::{Digest, Sha256};

/// A service node assigned to the current session. The dispatcher treats it
/// as an opaque handle; its lifetime is one session of the service-node
/// network.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionNode {
    pub public_key: NodePublicKey,
    pub service_url: String,
    pub chains: Vec<BlockchainId>,
}

/// The time-bounded assignment of a fixed node set to an
/// (application, chain) pair, produced by the relay sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub nodes: Vec<SessionNode>,
}

impl Session {
    pub fn fingerprint(&self) -> String {
        session_fingerprint(&self.nodes)
    }
}

/// Result of probing one node's view of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSyncLog {
    pub node: SessionNode,
    pub chain_id: BlockchainId,
    pub block_height: BlockHeight,
}

// Canonical form of a node inside the fingerprint preimage. The public key
// is elided; it is already accounted for by the sort order, and identical
// node sets must hash identically regardless of key representation.
#[derive(serde::Serialize)]
struct CanonicalNode<'a> {
    chains: &'a [BlockchainId],
    service_url: &'a str,
}

/// Deterministic 64-hex identifier of a session's node set, used as a cache
/// namespace for sync/chain check results. Node order does not matter; any
/// membership change produces a different fingerprint.
pub fn session_fingerprint(nodes: &[SessionNode]) -> String {
    let mut sorted: Vec<&SessionNode> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.public_key.cmp(&b.public_key));
    let canonical: Vec<CanonicalNode> = sorted
        .iter()
        .map(|node| CanonicalNode { chains: &node.chains, service_url: &node.service_url })
        .collect();
    let preimage = serde_json::to_vec(&canonical)
        .expect("canonical node serialization cannot fail");
    hex::encode(Sha256::digest(&preimage))
}

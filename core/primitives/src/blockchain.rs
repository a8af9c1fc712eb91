use crate::types::BlockchainId;

/// Parameters of the periodic verification that session nodes serve the
/// tip of this chain.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncCheckOptions {
    /// JSON-RPC body probing the node's current block height.
    pub payload: String,
    /// Number of blocks a node may lag the highest reported height while
    /// still being admitted as in-sync.
    pub allowance: u64,
}

/// Static description of a backend blockchain, loaded once at startup and
/// indexed by both `id` and every path alias.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockchainDescriptor {
    /// Hex identifier on the service-node network, e.g. "0021".
    pub id: BlockchainId,
    pub ticker: String,
    /// Declared chain identity, e.g. "1" for Ethereum mainnet. Nodes whose
    /// reported chain ID differs are filtered out.
    pub network_id: String,
    /// URL path prefixes under which clients address this chain.
    pub aliases: Vec<String>,
    pub sync_check: Option<SyncCheckOptions>,
    /// JSON-RPC body probing the node's reported chain ID.
    pub chain_id_check: Option<String>,
    pub log_limit: Option<u64>,
    /// Alternative centralized backend used when the decentralized relay
    /// path is exhausted.
    pub alt_runtime_url: Option<String>,
}

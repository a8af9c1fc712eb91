//! Session health filters. Before a relay is dispatched, the session's
//! nodes pass through the sync check (is the node at the chain tip?) and
//! the chain-ID check (does the node serve the chain it claims?). Verified
//! subsets are cached per session fingerprint; a distributed probe lock
//! elects a single prober per fingerprint across the gateway fleet.
//!
//! Both filters fail open: whenever the verdict is uncertain (lock held
//! elsewhere, too few probes, disagreeing nodes, cache outage) the full
//! node set is served rather than guessing.

use gateway_primitives::application::Aat;
use gateway_primitives::blockchain::BlockchainDescriptor;
use gateway_primitives::relay::{RelayConfig, RelaySender};
use std::sync::Arc;

mod chain;
mod common;
mod sync;

pub use chain::ChainChecker;
pub use sync::SyncChecker;

/// Everything a probing pass needs besides the node set. Owned so that the
/// detached consensus challenge can outlive the request.
#[derive(Clone)]
pub struct ProbeContext {
    pub blockchain: Arc<BlockchainDescriptor>,
    pub application_id: String,
    pub app_public_key: String,
    pub aat: Aat,
    pub request_id: String,
    pub relay_sender: Arc<dyn RelaySender>,
    /// Timeout-shortened configuration probes run with.
    pub probe_config: RelayConfig,
    /// Configuration of the fire-and-forget consensus challenge.
    pub consensus_config: RelayConfig,
}

use crate::application::{Aat, Application};
use crate::errors::UpstreamError;
use crate::session::{Session, SessionNode};
use crate::types::BlockchainId;
use gateway_time::Duration;

/// Transient configuration of a single outbound relay. Produced from the
/// process-wide `PocketConfiguration` by the configuration tuner; probes and
/// consensus challenges run with adjusted variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Per-attempt dispatch timeout.
    pub request_timeout: Duration,
    /// Number of nodes a consensus relay is dispatched to. Zero for plain
    /// relays.
    pub consensus_node_count: u64,
    pub accept_disputed_responses: bool,
    pub validate_relay_responses: bool,
    pub reject_self_signed_certificates: bool,
}

/// One outbound relay, addressed either to a concrete session node or (for
/// consensus relays) to a node set chosen by the sender.
#[derive(Debug, Clone)]
pub struct RelayAttempt<'a> {
    pub blockchain: &'a BlockchainId,
    /// Raw JSON-RPC body forwarded verbatim.
    pub payload: &'a [u8],
    /// HTTP path on the service node, empty for plain JSON-RPC backends.
    pub path: &'a str,
    pub aat: &'a Aat,
    pub config: RelayConfig,
    pub node: Option<&'a SessionNode>,
    /// Dispatch as a consensus relay to `config.consensus_node_count`
    /// nodes and return the majority answer.
    pub consensus: bool,
}

/// Successful upstream answer, returned to the client byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub payload: Vec<u8>,
}

/// Client of the service-node network. Session dispatch and cryptographic
/// relay signing live behind this seam; the dispatcher only decides *which*
/// node to talk to.
#[async_trait::async_trait]
pub trait RelaySender: Send + Sync {
    /// The session currently assigned to `(app, chain)`.
    async fn current_session(
        &self,
        app: &Application,
        chain: &BlockchainId,
    ) -> Result<Session, UpstreamError>;

    /// Discards the cached session for `(app, chain)` and dispatches a new
    /// one. Called when a node reports the session expired.
    async fn refresh_session(
        &self,
        app: &Application,
        chain: &BlockchainId,
    ) -> Result<Session, UpstreamError>;

    async fn send(&self, attempt: RelayAttempt<'_>) -> Result<RelayResponse, UpstreamError>;
}
